use crate::command::{encode, split_args, CommandArg, WireArg, SCRATCH};
use crate::error::ErrorKind;

fn encoded(name: &str, args: &[WireArg]) -> String {
    String::from_utf8(encode(name, args).unwrap().to_vec()).unwrap()
}

#[test]
fn test_encode_wire_layout() {
    let cases = vec![
        ("", vec![], "AT"),
        ("+RESTORE", vec![], "AT+RESTORE"),
        (
            "+CWMODE=",
            vec![WireArg::Int(1), WireArg::Int(0)],
            "AT+CWMODE=1,0",
        ),
        (
            "+CWJAP=",
            vec![
                WireArg::Str("SSID".into()),
                WireArg::Str("password".into()),
                WireArg::Null,
                WireArg::Int(1),
                WireArg::Int(2),
                WireArg::Null,
                WireArg::Int(1),
            ],
            "AT+CWJAP=\"SSID\",\"password\",,1,2,,1",
        ),
        (
            "+CIPSERVER=1,",
            vec![WireArg::Int(1234)],
            "AT+CIPSERVER=1,1234",
        ),
        (
            "+CIPTCPOPT=",
            vec![WireArg::Int(-1), WireArg::Int(0), WireArg::Int(999)],
            "AT+CIPTCPOPT=-1,0,999",
        ),
    ];

    for (name, args, want) in cases {
        assert_eq!(format!("{want}\r\n"), encoded(name, &args), "AT{name}");
    }
}

#[test]
fn test_encode_escapes_quotes_and_backslashes() {
    assert_eq!(
        "AT+X=\"a\\\"b\\\\c\"\r\n",
        encoded("+X=", &[WireArg::Str("a\"b\\c".into())])
    );
}

#[test]
fn test_encode_fills_scratch_exactly() {
    // 2 (AT) + 3 (name) + 2 (quotes) + 119 + 2 (CRLF) = 128
    let frame = encode("+X=", &[WireArg::Str("x".repeat(119))]).unwrap();
    assert_eq!(SCRATCH, frame.len());
}

#[test]
fn test_encode_overflow() {
    let result = encode("+X=", &[WireArg::Str("x".repeat(120))]);
    assert_eq!(Err(ErrorKind::TxOverflow), result);
}

#[test]
fn test_receive_buffer_skipped_and_measured() {
    let mut buf = [0u8; 4];
    let (recv_len, wire) =
        split_args(&[CommandArg::Buf(&mut buf), CommandArg::Int(0), CommandArg::Int(8)]).unwrap();
    assert_eq!(Some(4), recv_len);
    assert_eq!(vec![WireArg::Int(0), WireArg::Int(8)], wire);
}

#[test]
fn test_receive_buffer_only_valid_first() {
    let mut buf = [0u8; 4];
    let result = split_args(&[CommandArg::Int(0), CommandArg::Buf(&mut buf)]);
    assert_eq!(Err(ErrorKind::ArgType), result);
}

#[test]
fn test_split_args_owns_values() {
    let (recv_len, wire) = split_args(&[
        CommandArg::Str("TCP"),
        CommandArg::Null,
        CommandArg::Int(-7),
    ])
    .unwrap();
    assert_eq!(None, recv_len);
    assert_eq!(
        vec![
            WireArg::Str("TCP".into()),
            WireArg::Null,
            WireArg::Int(-7)
        ],
        wire
    );
}
