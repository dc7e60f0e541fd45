use crate::command::{CommandArg, CommandResponse};
use crate::error::{Error, ErrorKind};
use crate::tests::mock::mock_device;

#[test]
fn test_cmd_str_reply_is_response_body() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"AT version:2.1.0\r\n\r\nOK\r\n");

    let version = dev.cmd_str("+GMR", &mut []).unwrap();
    assert_eq!("AT version:2.1.0\n", version);
    assert_eq!("AT+GMR\r\n", sink.sent());
}

#[test]
fn test_cmd_encodes_arguments() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\n");

    dev.cmd(
        "+CWJAP=",
        &mut [
            CommandArg::Str("SSID"),
            CommandArg::Str("password"),
            CommandArg::Null,
            CommandArg::Int(1),
            CommandArg::Int(2),
            CommandArg::Null,
            CommandArg::Int(1),
        ],
    )
    .unwrap();
    assert_eq!("AT+CWJAP=\"SSID\",\"password\",,1,2,,1\r\n", sink.sent());
}

#[test]
fn test_error_reply_with_empty_body_is_socket() {
    let (dev, feed, _sink) = mock_device("esp0");
    feed.push(b"\r\nERROR\r\n");

    let err = dev.cmd("+CIPSTART=", &mut []).unwrap_err();
    assert_eq!(
        Error {
            device: "esp0".into(),
            command: "+CIPSTART=".into(),
            kind: ErrorKind::Esp("socket".into()),
        },
        err
    );
    assert!(!err.is_timeout());
    assert_eq!("esp0: +CIPSTART=: socket", err.to_string());
}

#[test]
fn test_error_reply_carries_body_as_code() {
    let (dev, feed, _sink) = mock_device("esp0");
    feed.push(b"no ip\r\n\r\nERROR\r\n");

    let err = dev.cmd("+CIPSTART=", &mut []).unwrap_err();
    assert_eq!(ErrorKind::Esp("no ip\n".into()), err.kind);
}

#[test]
fn test_replies_complete_in_submission_order() {
    let (dev, feed, _sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\nfirst\r\n\r\nOK\r\n\r\nERROR\r\n");

    assert!(matches!(
        dev.cmd("+CWMODE=", &mut [CommandArg::Int(1)]).unwrap(),
        CommandResponse::Empty
    ));
    assert_eq!("first\n", dev.cmd_str("+GMR", &mut []).unwrap());
    let err = dev.cmd("+CIPSTART=", &mut []).unwrap_err();
    assert_eq!(ErrorKind::Esp("socket".into()), err.kind);
}

#[test]
fn test_payload_send_lock_span() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\nRecv 5 bytes\r\n\r\nSEND OK\r\n");

    let lock = dev.lock();
    lock.cmd("+CIPSEND=", &mut [CommandArg::Int(0), CommandArg::Int(5)])
        .unwrap();
    lock.write(b"hello").unwrap();
    let reply = lock.cmd("", &mut []).unwrap();
    assert!(matches!(reply, CommandResponse::Empty));
    drop(lock);

    assert_eq!("AT+CIPSEND=0,5\r\nhello", sink.sent());
}

#[test]
fn test_send_fail_maps_to_timeout() {
    let (dev, feed, _sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\n\r\nSEND FAIL\r\n");

    let lock = dev.lock();
    lock.cmd("+CIPSEND=", &mut [CommandArg::Int(0), CommandArg::Int(5)])
        .unwrap();
    lock.write_str("hello").unwrap();
    let err = lock.cmd("", &mut []).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(ErrorKind::Timeout, err.kind);
}

#[test]
fn test_dial_completes_with_connection() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"0,CONNECT\r\n\r\nOK\r\n");

    let conn = dev
        .cmd_conn(
            "+CIPSTARTEX=",
            &mut [
                CommandArg::Str("TCP"),
                CommandArg::Str("192.0.2.7"),
                CommandArg::Int(4444),
            ],
        )
        .unwrap();
    assert_eq!(0, conn.id);
    assert_eq!("AT+CIPSTARTEX=\"TCP\",\"192.0.2.7\",4444\r\n", sink.sent());
}

#[test]
fn test_server_channel_takes_inbound_connections() {
    let (dev, feed, _sink) = mock_device("esp0");
    dev.set_server(true);
    let accept = dev.server().unwrap();

    feed.push(b"1,CONNECT\r\n");
    let conn = accept.recv().unwrap();
    assert_eq!(1, conn.id);

    // The CONNECT never becomes the reply of a pending command; the dial
    // below only sees the bare OK.
    feed.push(b"\r\nOK\r\n");
    let err = dev.cmd_conn("+CIPSTART=", &mut []).unwrap_err();
    assert_eq!(ErrorKind::ResponseType, err.kind);

    dev.set_server(false);
    assert!(dev.server().is_none());
}

#[test]
fn test_typed_wrapper_mismatch() {
    let (dev, feed, _sink) = mock_device("esp0");
    feed.push(b"body\r\n\r\nOK\r\n\r\nOK\r\n");

    let err = dev.cmd_int("+GMR", &mut []).unwrap_err();
    assert_eq!(ErrorKind::ResponseType, err.kind);

    let err = dev.cmd_conn("+GMR", &mut []).unwrap_err();
    assert_eq!(ErrorKind::ResponseType, err.kind);
}

#[test]
fn test_buffer_argument_rejected_when_not_first() {
    let (dev, _feed, sink) = mock_device("esp0");
    let mut buf = [0u8; 4];

    let err = dev
        .cmd(
            "+CIPRECVDATA=",
            &mut [CommandArg::Int(0), CommandArg::Buf(&mut buf)],
        )
        .unwrap_err();
    assert_eq!(ErrorKind::ArgType, err.kind);
    assert_eq!("", sink.sent());
}

#[test]
fn test_oversized_frame_rejected_without_write() {
    let (dev, _feed, sink) = mock_device("esp0");
    let long = "x".repeat(130);

    let err = dev.cmd("+CWJAP=", &mut [CommandArg::Str(&long)]).unwrap_err();
    assert_eq!(ErrorKind::TxOverflow, err.kind);
    assert_eq!("", sink.sent());
}

#[test]
fn test_init_resets_and_configures() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\nready\r\n\r\nOK\r\n\r\nOK\r\n");

    dev.init(true).unwrap();
    assert_eq!("AT+RST\r\nATE0\r\nAT+SYSLOG=1\r\n", sink.sent());
}

#[test]
fn test_init_skips_stale_events_before_ready() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"WIFI DISCONNECT\r\n\r\nOK\r\nWIFI GOT IP\r\nready\r\n\r\nOK\r\n\r\nOK\r\n");

    dev.init(true).unwrap();
    assert_eq!("AT+RST\r\nATE0\r\nAT+SYSLOG=1\r\n", sink.sent());
}

#[test]
fn test_init_without_reset() {
    let (dev, feed, sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\n\r\nOK\r\n");

    dev.init(false).unwrap();
    assert_eq!("ATE0\r\nAT+SYSLOG=1\r\n", sink.sent());
}

#[test]
fn test_init_times_out_without_ready() {
    let (dev, feed, _sink) = mock_device("esp0");
    feed.push(b"\r\nOK\r\n");

    let err = dev.init(true).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!("ready", err.command);
    assert_eq!("esp0", err.device);
}

#[test]
fn test_device_closed_after_transport_eof() {
    let (dev, feed, _sink) = mock_device("esp0");
    drop(feed);

    let err = dev.cmd("+GMR", &mut []).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Transport(_)));
}
