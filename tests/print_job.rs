//! Full print jobs against a scripted printer.

mod common;

use std::time::Duration;

use common::*;
use niimbot::{MonoBitmap, NoResponsePolicy, Printer, PrinterConfig};
use pretty_assertions::assert_eq;

const SETUP: [u8; 5] = [33, 35, 1, 3, 19];

/// Acks everything, but answers END_PRINT with "busy" `busy_polls` times.
fn finishing_after(busy_polls: usize) -> ScriptedPrinter {
    let mut remaining = busy_polls;
    ScriptedPrinter::new(move |req| {
        if req.packet_type() == RequestCode::EndPrint.code() && remaining > 0 {
            remaining -= 1;
            return reply_with(req, &[0]);
        }
        ack(req)
    })
}

#[tokio::test(start_paused = true)]
async fn test_blank_16x8_job_sequence() {
    let mut printer = Printer::new(finishing_after(2));
    let bitmap = MonoBitmap::blank(16, 8);

    printer.print_image(&bitmap, 3).await.unwrap();

    let packets = printer.transport().written_packets();
    let mut expected_types = SETUP.to_vec();
    expected_types.extend([PRINT_BITMAP_ROW; 8]);
    expected_types.extend([227, 163, 243, 243, 243]);
    assert_eq!(
        packets.iter().map(|p| p.packet_type()).collect::<Vec<_>>(),
        expected_types
    );

    assert_eq!(packets[0].data(), &[3]);
    assert_eq!(packets[1].data(), &[1]);
    // Height first, then width.
    assert_eq!(packets[4].data(), &[0x00, 0x08, 0x00, 0x10]);
    for (y, row) in packets[5..13].iter().enumerate() {
        assert_eq!(row.data(), &[0x00, y as u8, 0, 0, 0, 1, 0x00, 0x00]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_inked_rows_reach_the_wire() {
    let mut printer = Printer::new(ScriptedPrinter::acking());
    let bitmap = MonoBitmap::from_fn(8, 2, |x, y| y == 1 && x < 4);

    printer.print_image(&bitmap, 5).await.unwrap();

    let rows: Vec<_> = printer
        .transport()
        .written_packets()
        .into_iter()
        .filter(|p| p.packet_type() == PRINT_BITMAP_ROW)
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].data(), &[0, 0, 0, 0, 0, 1, 0x00]);
    assert_eq!(rows[1].data(), &[0, 1, 0, 0, 0, 1, 0xF0]);
}

#[tokio::test(start_paused = true)]
async fn test_line_noise_does_not_abort_job() {
    let mut transport = finishing_after(1);
    transport.push_inbound(&[0x13, 0x37]);
    transport.noise = vec![0x00, 0x13, 0x37];
    let config = PrinterConfig {
        no_response: NoResponsePolicy::Strict,
        ..PrinterConfig::default()
    };
    let mut printer = Printer::with_config(transport, config);

    printer.print_image(&MonoBitmap::blank(16, 8), 3).await.unwrap();

    let mut expected_types = SETUP.to_vec();
    expected_types.extend([PRINT_BITMAP_ROW; 8]);
    expected_types.extend([227, 163, 243, 243]);
    assert_eq!(printer.transport().written_types(), expected_types);
}

#[tokio::test(start_paused = true)]
async fn test_silent_printer_completes_with_lenient_policy() {
    let mut printer = Printer::new(ScriptedPrinter::silent());
    let bitmap = MonoBitmap::blank(16, 8);

    printer.print_image(&bitmap, 3).await.unwrap();

    let types = printer.transport().written_types();
    assert_eq!(types.iter().filter(|&&t| t == 243).count(), 1);
    assert_eq!(types.last(), Some(&243));
}

#[tokio::test(start_paused = true)]
async fn test_job_pacing_and_delays() {
    let config = PrinterConfig {
        packet_pacing: Duration::from_millis(10),
        flush_delay: Duration::from_secs(1),
        status_delay: Duration::from_secs(1),
        end_print_interval: Duration::from_millis(100),
        ..PrinterConfig::default()
    };
    let mut printer = Printer::with_config(finishing_after(1), config);
    let start = tokio::time::Instant::now();

    printer.print_image(&MonoBitmap::blank(8, 4), 3).await.unwrap();

    // 4 rows * 10ms + flush 1s + status 1s + one END_PRINT retry 100ms.
    assert_eq!(start.elapsed(), Duration::from_millis(40 + 1000 + 1000 + 100));
}

#[tokio::test(start_paused = true)]
async fn test_strict_policy_names_failed_step() {
    let config = PrinterConfig {
        no_response: NoResponsePolicy::Strict,
        ..PrinterConfig::default()
    };
    let mut printer = Printer::with_config(ScriptedPrinter::silent(), config);

    let err = printer
        .print_image(&MonoBitmap::blank(8, 1), 3)
        .await
        .unwrap_err();

    match err {
        PrinterError::JobFailed { step, source } => {
            assert_eq!(step, "SET_LABEL_DENSITY");
            assert!(matches!(
                *source,
                PrinterError::NoResponse(RequestCode::SetLabelDensity)
            ));
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
    assert_eq!(printer.transport().writes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_step_aborts_job() {
    let mut printer = Printer::new(ScriptedPrinter::new(|req| {
        if req.packet_type() == RequestCode::StartPagePrint.code() {
            reply_with(req, &[0])
        } else {
            ack(req)
        }
    }));

    let err = printer
        .print_image(&MonoBitmap::blank(8, 1), 3)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("START_PAGE_PRINT"));
    assert_eq!(printer.transport().written_types(), vec![33, 35, 1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_printer_error_aborts_job() {
    let mut printer = Printer::new(ScriptedPrinter::new(|req| {
        if req.packet_type() == RequestCode::SetDimension.code() {
            vec![Packet::new(0xDB, vec![0x01u8]).unwrap()]
        } else {
            ack(req)
        }
    }));

    let err = printer
        .print_image(&MonoBitmap::blank(8, 1), 3)
        .await
        .unwrap_err();

    assert!(err.is_protocol());
    assert!(err.to_string().contains("SET_DIMENSION"));
    assert!(!printer.transport().written_types().contains(&PRINT_BITMAP_ROW));
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_during_raster_aborts_job() {
    let mut transport = ScriptedPrinter::acking();
    transport.fail_writes_after = Some(SETUP.len() + 3);
    let mut printer = Printer::new(transport);

    let err = printer
        .print_image(&MonoBitmap::blank(8, 10), 3)
        .await
        .unwrap_err();

    assert!(err.is_connection());
    assert!(err.to_string().contains("PRINT_BITMAP_ROW"));
    assert_eq!(printer.transport().writes.len(), SETUP.len() + 3);
}

#[tokio::test(start_paused = true)]
async fn test_end_print_poll_cap() {
    let config = PrinterConfig {
        end_print_attempts: Some(3),
        ..PrinterConfig::default()
    };
    let mut printer = Printer::with_config(finishing_after(usize::MAX), config);

    let err = printer
        .print_image(&MonoBitmap::blank(8, 1), 3)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("END_PRINT"));
    let types = printer.transport().written_types();
    assert_eq!(types.iter().filter(|&&t| t == 243).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_only_when_configured() {
    let mut printer = Printer::new(ScriptedPrinter::acking());
    printer.print_image(&MonoBitmap::blank(8, 1), 3).await.unwrap();
    assert_eq!(printer.transport().handshakes, 0);

    let config = PrinterConfig {
        handshake: true,
        ..PrinterConfig::default()
    };
    let mut printer = Printer::with_config(ScriptedPrinter::acking(), config);
    printer.print_image(&MonoBitmap::blank(8, 1), 3).await.unwrap();
    assert_eq!(printer.transport().handshakes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_input_is_rejected_before_any_write() {
    let mut printer = Printer::new(ScriptedPrinter::acking());

    let err = printer
        .print_image(&MonoBitmap::blank(8, 1), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, PrinterError::InvalidArgument(_)));

    let err = printer
        .print_image(&MonoBitmap::blank(4000, 1), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, PrinterError::InvalidBitmap(_)));

    assert!(printer.transport().writes.is_empty());
}
