use std::env;

use niimbot::dithering::{load_bitmap, ImageDithering};
use niimbot::{BleTransport, InfoKey, Printer, StreamTransport, Transport};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Example: print one image as a label
/// - `<address>` is a BLE address, or an RFCOMM device such as /dev/rfcomm0
/// - density defaults to 3, the dithering to Atkinson
///
/// Set RUST_LOG=niimbot=debug to see every frame on the wire.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (address, image_path) = match args.as_slice() {
        [address, image_path, ..] => (address.as_str(), image_path.as_str()),
        _ => {
            eprintln!("usage: print_label <address|/dev/rfcommN> <image> [density 1-5] [max width]");
            return Ok(());
        }
    };
    let density: u8 = args.get(2).map(|d| d.parse()).transpose()?.unwrap_or(3);
    let max_width: Option<u32> = args.get(3).map(|w| w.parse()).transpose()?;

    let bitmap = load_bitmap(image_path, max_width, ImageDithering::Atkinson)?;

    if address.starts_with("/dev/") {
        run(Printer::new(StreamTransport::rfcomm(address)), &bitmap, density).await
    } else {
        run(Printer::new(BleTransport::new(address)), &bitmap, density).await
    }
}

async fn run<T: Transport>(
    mut printer: Printer<T>,
    bitmap: &niimbot::MonoBitmap,
    density: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    match printer.get_info(InfoKey::Battery).await {
        Ok(Some(battery)) => println!("Battery: {battery:?}"),
        Ok(None) => println!("Battery: no reply"),
        Err(e) => eprintln!("Battery query failed: {e}"),
    }
    match printer.get_rfid().await {
        Ok(Some(rfid)) => println!("Loaded labels: {rfid:?}"),
        Ok(None) => println!("No RFID tag on the loaded roll"),
        Err(e) => eprintln!("RFID query failed: {e}"),
    }

    println!("Sending print job...");
    let outcome = printer.print_image(bitmap, density).await;
    printer.close().await?;
    match outcome {
        Ok(()) => println!("Print job completed."),
        Err(e) => eprintln!("Print job failed: {e}"),
    }
    Ok(())
}
