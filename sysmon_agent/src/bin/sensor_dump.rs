//! sensor_dump: read frames from the sensor device forever and print them, one `key:value`
//! per line with `---` after each frame. Handy for checking wiring before starting the agent.

use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use sysmon_agent::serial::{read_device_frame, SerialError, SystemSerial};

const DEFAULT_DEVICE: &str = "/dev/sensors/ftdi_12345";
const DEFAULT_BAUD: u32 = 9600;
const DEFAULT_RETRY_SECS: u64 = 10;

struct Args {
    device: String,
    baud: u32,
    retry: Duration,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--device PATH] [--baud N] [--retry-secs N]")
}

/// `Ok(None)` when help was asked for.
fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Option<Args>, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "sensor_dump".into());
    let mut out = Args {
        device: DEFAULT_DEVICE.into(),
        baud: DEFAULT_BAUD,
        retry: Duration::from_secs(DEFAULT_RETRY_SECS),
    };
    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| it.next())
                .ok_or_else(|| format!("{flag} needs a value\n{}", usage(&prog)))
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "--device" => out.device = value()?,
            "--baud" => {
                let v = value()?;
                out.baud = v.parse().map_err(|_| format!("invalid baud '{v}'"))?;
            }
            "--retry-secs" => {
                let v = value()?;
                out.retry = Duration::from_secs(v.parse().map_err(|_| format!("invalid retry '{v}'"))?);
            }
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }
    Ok(Some(out))
}

fn main() {
    let args = match parse_args(std::env::args()) {
        Ok(Some(a)) => a,
        Ok(None) => {
            let prog = std::env::args().next().unwrap_or_else(|| "sensor_dump".into());
            println!("{}", usage(&prog));
            return;
        }
        Err(text) => {
            eprintln!("{text}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let transport = SystemSerial::default();
    loop {
        match read_device_frame(&transport, &args.device, args.baud) {
            Ok(frame) => {
                for (key, value) in frame.iter() {
                    println!("{key}:{value}");
                }
                println!("---");
                sleep(Duration::from_secs(1));
            }
            Err(SerialError::DeviceUnavailable { .. }) => {
                println!("Device not available...");
                debug!(device = %args.device, retry_in = ?args.retry, "waiting for device");
                sleep(args.retry);
            }
            Err(e) => {
                warn!(device = %args.device, "frame read failed: {e}");
                sleep(Duration::from_secs(1));
            }
        }
    }
}
