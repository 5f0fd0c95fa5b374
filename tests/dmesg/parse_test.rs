//! Kernel log line parsing.

use btrescue::dmesg::{parse_line, LogSource};

#[test]
fn parses_timestamp_and_message() {
    let record = parse_line("[123.456] Bluetooth: hci0: hardware error 0x00")
        .expect("well-formed line should parse");
    assert_eq!(record.timestamp, "123.456");
    assert_eq!(record.message, "Bluetooth: hci0: hardware error 0x00");
}

#[test]
fn keeps_timestamp_padding() {
    let record = parse_line("[    5.123456] usb 1-1: new device").expect("padded line");
    assert_eq!(record.timestamp, "    5.123456");
    assert_eq!(record.message, "usb 1-1: new device");
}

#[test]
fn message_may_contain_brackets() {
    let record = parse_line("[1.0] wlan0: [ath] reset").expect("bracketed message");
    assert_eq!(record.message, "wlan0: [ath] reset");
}

#[test]
fn rejects_lines_without_timestamp_prefix() {
    assert!(parse_line("Bluetooth: hci0: hardware error 0x00").is_none());
    assert!(parse_line("").is_none());
    assert!(parse_line("[abc] message").is_none());
}

#[test]
fn rejects_missing_separator_or_message() {
    assert!(parse_line("[1.0]message").is_none());
    assert!(parse_line("[1.0] ").is_none());
}

#[test]
fn default_source_follows_dmesg() {
    let source = LogSource::default();
    assert_eq!(source.program, "dmesg");
    assert_eq!(source.args, vec!["--follow"]);
}

#[test]
fn source_from_command_line() {
    let command = vec!["journalctl".to_owned(), "-kf".to_owned()];
    let source = LogSource::from_command(&command).expect("non-empty command");
    assert_eq!(source.program, "journalctl");
    assert_eq!(source.args, vec!["-kf"]);
    assert!(LogSource::from_command(&[]).is_none());
}
