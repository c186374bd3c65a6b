use std::time::Duration;

use anyhow::Result;
use hackrf_stream::{ComplexI8, Config, samples_mut};

fn main() -> Result<()> {
    let hackrf = hackrf_stream::open_hackrf(Config::default())?;

    // Configure: 10MHz sample rate, set TX IF gain to 16 dB, and tune to
    // 915 MHz. The tone lands 100 kHz above that.
    let dev = hackrf.device();
    dev.set_sample_rate_auto(10e6)?;
    dev.set_tx_vga_gain(16)?;
    dev.set_frequency(915_000_000)?;

    let step = 2.0 * std::f64::consts::PI * 100e3 / 10e6;
    let mut phase = 0.0f64;

    // Send about five seconds worth of samples.
    let queue = hackrf.start_tx()?;
    let mut sent = 0usize;
    while sent < 50_000_000 {
        let mut buf = hackrf.acquire_buffer();
        for x in samples_mut(&mut buf) {
            *x = ComplexI8::new(
                (phase.cos() * 100.0) as i8,
                (phase.sin() * 100.0) as i8,
            );
            phase = (phase + step) % (2.0 * std::f64::consts::PI);
        }
        sent += buf.len() / 2;
        if queue.push_timeout(buf, Duration::from_secs(1)).is_err() {
            break;
        }
        if hackrf.mode() == hackrf_stream::TransceiverMode::Off {
            println!("Transmit stopped early");
            break;
        }
    }

    // Let the queue drain before switching off.
    while !queue.is_empty() && hackrf.mode() != hackrf_stream::TransceiverMode::Off {
        std::thread::sleep(Duration::from_millis(10));
    }
    hackrf.stop()?;
    println!(
        "Sent {} packets, {} bytes/s",
        hackrf.stats().packet_counter(),
        hackrf.stats().average_rate()
    );
    Ok(())
}
