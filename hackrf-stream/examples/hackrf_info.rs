use anyhow::Result;
use hackrf_stream::Config;

fn main() -> Result<()> {
    let devices = hackrf_stream::list_hackrf_devices()?;
    if devices.is_empty() {
        println!("No HackRF boards found.");
        return Ok(());
    }

    for (i, desc) in devices.into_iter().enumerate() {
        println!("Found HackRF");
        println!("Index: {i}");
        println!("Type: {}", desc.radio_type());
        if let Some(serial) = desc.serial() {
            println!("Serial number: {serial}");
        }

        let hackrf = desc.open(Config::default())?;
        let dev = hackrf.device();
        println!(
            "Board ID Number: {} ({})",
            dev.board().as_u8(),
            dev.board()
        );
        println!("Firmware Version: {}", dev.version_string()?);
        let serial = dev.part_id_and_serial()?;
        println!(
            "Part ID Number: 0x{:08x} 0x{:08x}",
            serial.part_id[0], serial.part_id[1]
        );
        println!();
    }
    Ok(())
}
