
mod command;
mod device;
