//! Melsec client against mock MC 4E devices
//!
//! - End-to-end word read into the register file through a scan thread
//! - Serial correlation (mismatch waits in place, never reaches registers,
//!   a fresh frame behind a stale one in the same segment is still read)
//! - End code rejection is terminal
//! - Bit reads, word writes, UDP transport

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, handler, melsec_split, tcp_device, udp_device, Reply};
use field_comlink::{LinkError, RegisterFile, ValidationError};
use field_protocols::melsec::{
    encode_response, MelsecClient, MelsecOptions, MelsecRequest, Route, CMD_BATCH_WRITE, SUB_BIT,
};
use field_protocols::{DeviceClient, ScanBlock, Scanner, ScannerOptions, TransportConfig};
use field_scan::{ScanThread, ThreadOptions};

/// Answers batch reads of D100.. with 0x1111 * (n + 1)
fn word_device(request: &[u8]) -> Vec<Reply> {
    let req = MelsecRequest::decode(request).unwrap();
    let data: Vec<u8> = (0..req.count)
        .flat_map(|i| (0x1111u16 * (i + 1)).to_le_bytes())
        .collect();
    vec![Reply::now(encode_response(req.serial, req.route, 0, &data))]
}

fn client(config: TransportConfig) -> MelsecClient {
    MelsecClient::new("plc", config, MelsecOptions::default()).unwrap()
}

#[tokio::test]
async fn test_read_four_words_into_register_file() {
    let (addr, journal) = tcp_device(melsec_split, handler(word_device)).await;
    let client = Arc::new(client(TransportConfig::tcp("127.0.0.1", addr.port())));
    let registers = Arc::new(RegisterFile::new(16));

    let scanner = Scanner::new(
        client.clone(),
        registers.clone(),
        vec![ScanBlock::words("D100".parse().unwrap(), 4, 2)],
        ScannerOptions::default(),
    )
    .unwrap();
    let thread = ScanThread::spawn(
        scanner,
        ThreadOptions::new("scan").with_interval(Duration::from_millis(20)),
    )
    .await
    .unwrap();

    assert!(eventually(2000, || registers.word(5).unwrap() == 0x4444).await);
    thread.terminate(0, true).await;

    assert_eq!(registers.words(2, 4).unwrap(), vec![0x1111, 0x2222, 0x3333, 0x4444]);
    assert_eq!(registers.word(0).unwrap(), 0);

    let first = MelsecRequest::decode(&journal.requests()[0]).unwrap();
    assert_eq!(first.address, "D100".parse().unwrap());
    assert_eq!(first.count, 4);
    assert_eq!(first.route, Route::default());
    assert!(!client.is_open(), "scanner closes the link on stop");
}

#[tokio::test]
async fn test_serial_mismatch_waits_in_place() {
    // Wrong serial first, the right one 50 ms later on the same request
    let (addr, journal) = tcp_device(
        melsec_split,
        handler(|request| {
            let req = MelsecRequest::decode(request).unwrap();
            let data = 7u16.to_le_bytes();
            vec![
                Reply::now(encode_response(req.serial.wrapping_add(9), req.route, 0, &data)),
                Reply::after(50, encode_response(req.serial, req.route, 0, &data)),
            ]
        }),
    )
    .await;
    let client = client(TransportConfig::tcp("127.0.0.1", addr.port()).with_timeout_ms(500));

    let values = client.read_words("D0".parse().unwrap(), 1).await.unwrap();
    assert_eq!(values, vec![7]);
    assert_eq!(journal.len(), 1, "no re-send on a serial mismatch");

    let stats = client.transport_stats();
    assert_eq!(stats.validation_failures, 1);
    assert_eq!(stats.responses, 1);
}

#[tokio::test]
async fn test_stale_and_fresh_frame_in_one_segment() {
    let (addr, journal) = tcp_device(
        melsec_split,
        handler(|request| {
            let req = MelsecRequest::decode(request).unwrap();
            let data = 7u16.to_le_bytes();
            let mut segment = encode_response(req.serial.wrapping_sub(1), req.route, 0, &data);
            segment.extend(encode_response(req.serial, req.route, 0, &data));
            vec![Reply::now(segment)]
        }),
    )
    .await;
    let client = client(
        TransportConfig::tcp("127.0.0.1", addr.port())
            .with_timeout_ms(500)
            .with_retry_count(1),
    );

    let values = client.read_words("D0".parse().unwrap(), 1).await.unwrap();
    assert_eq!(values, vec![7]);
    assert_eq!(journal.len(), 1);

    let stats = client.transport_stats();
    assert_eq!(stats.validation_failures, 1);
    assert_eq!(stats.timeouts, 0);
}

#[tokio::test]
async fn test_serial_mismatch_leaves_registers_untouched() {
    let (addr, _journal) = tcp_device(
        melsec_split,
        handler(|request| {
            let req = MelsecRequest::decode(request).unwrap();
            let data = [0xFFu8; 8];
            vec![Reply::now(encode_response(req.serial ^ 0x8000, req.route, 0, &data))]
        }),
    )
    .await;
    let client = client(
        TransportConfig::tcp("127.0.0.1", addr.port())
            .with_timeout_ms(100)
            .with_retry_count(2),
    );

    let err = client.read_words("D100".parse().unwrap(), 4).await.unwrap_err();
    assert!(matches!(err, LinkError::Connection(_)), "{err}");
    assert!(client.transport_stats().validation_failures >= 1);
    assert!(!client.is_open());

    // Same device behind a scanner that holds values while offline
    let registers = Arc::new(RegisterFile::new(8));
    let mut scanner = Scanner::new(
        Arc::new(client),
        registers.clone(),
        vec![ScanBlock::words("D100".parse().unwrap(), 4, 0)],
        ScannerOptions {
            offline: field_protocols::OfflineMode::Hold,
            reconnect_cycles: 1,
        },
    )
    .unwrap();
    let idle = ScanThread::new(Idle, ThreadOptions::new("idle"));
    assert!(field_scan::ScanLoop::tick(&mut scanner, &idle.context())
        .await
        .is_err());
    assert_eq!(registers.snapshot(), vec![0; 8]);
    assert!(!scanner.is_online());
}

#[tokio::test]
async fn test_end_code_is_terminal() {
    let (addr, journal) = tcp_device(
        melsec_split,
        handler(|request| {
            let req = MelsecRequest::decode(request).unwrap();
            vec![Reply::now(encode_response(req.serial, req.route, 0xC059, &[]))]
        }),
    )
    .await;
    let client = client(TransportConfig::tcp("127.0.0.1", addr.port()));

    let err = client.read_words("D0".parse().unwrap(), 2).await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::Validation(ValidationError::DeviceRejected { code: 0xC059 })
    ));
    assert_eq!(journal.len(), 1);
    assert!(client.is_open(), "a rejection does not drop the link");
}

#[tokio::test]
async fn test_bit_read_and_word_write() {
    let (addr, journal) = tcp_device(
        melsec_split,
        handler(|request| {
            let req = MelsecRequest::decode(request).unwrap();
            let data = if req.command == CMD_BATCH_WRITE {
                Vec::new()
            } else {
                vec![0x10, 0x01, 0x10]
            };
            vec![Reply::now(encode_response(req.serial, req.route, 0, &data))]
        }),
    )
    .await;
    let client = client(TransportConfig::tcp("127.0.0.1", addr.port()));

    let bits = client.read_bits("M8".parse().unwrap(), 5).await.unwrap();
    assert_eq!(bits, vec![true, false, false, true, true]);

    client
        .write_words("D10".parse().unwrap(), &[0x0102, 0xA0B0])
        .await
        .unwrap();

    let requests = journal.requests();
    let read = MelsecRequest::decode(&requests[0]).unwrap();
    assert_eq!(read.subcommand, SUB_BIT);
    let write = MelsecRequest::decode(&requests[1]).unwrap();
    assert_eq!(write.command, CMD_BATCH_WRITE);
    assert_eq!(write.data, vec![0x02, 0x01, 0xB0, 0xA0]);
    assert_eq!(write.serial, read.serial.wrapping_add(1));
}

#[tokio::test]
async fn test_udp_read() {
    let (addr, _journal) = udp_device(handler(word_device)).await;
    let client = client(TransportConfig::udp("127.0.0.1", addr.port()));

    let values = client.read_words("D100".parse().unwrap(), 2).await.unwrap();
    assert_eq!(values, vec![0x1111, 0x2222]);
}

struct Idle;

#[async_trait::async_trait]
impl field_scan::ScanLoop for Idle {
    async fn tick(&mut self, _ctx: &field_scan::ScanContext) -> field_comlink::Result<()> {
        Ok(())
    }
}
