//! Mock tracker device for testing
//!
//! A line-oriented TCP server speaking the device command protocol. Motion
//! is instantaneous: commanded positions are reported back immediately, so
//! arrival polling succeeds on the first read. Write-protected commands
//! answer `NO G` until `PW`/`PR 0` has been seen, which exercises the
//! client's re-authentication path.
//!
//! Usage:
//!   mock_solys [PORT]
//!
//! The port can also be set via the MOCK_SOLYS_PORT environment variable.
//! Command line argument takes precedence. Default port is 15000.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

use chrono::{Datelike, Timelike, Utc};

const PASSWORD: &str = "solys";

struct DeviceState {
    authenticated: bool,
    protection_lifted: bool,
    azimuth: f64,
    zenith: f64,
    adjust_azimuth: f64,
    adjust_zenith: f64,
    power_save: bool,
    function: u8,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            authenticated: false,
            protection_lifted: false,
            azimuth: 0.0,
            zenith: 90.0,
            adjust_azimuth: 0.0,
            adjust_zenith: 0.0,
            power_save: true,
            function: 1,
        }
    }
}

fn main() {
    let port = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("MOCK_SOLYS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(15000u16);

    let listener = match TcpListener::bind(format!("127.0.0.1:{}", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    eprintln!("Mock device listening on port {}", port);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let addr = stream.peer_addr().ok();
                eprintln!("Connection from {:?}", addr);
                std::thread::spawn(move || handle_client(stream));
            }
            Err(e) => {
                eprintln!("Accept error: {}", e);
            }
        }
    }
}

fn handle_client(mut stream: TcpStream) {
    let mut state = DeviceState::new();
    let reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to clone stream: {}", e);
            return;
        }
    });

    for line in reader.lines() {
        let request = match line {
            Ok(r) => r,
            Err(_) => break,
        };
        let request = request.trim();
        if request.is_empty() {
            continue;
        }

        eprintln!("Received: {}", request);
        let response = handle_request(request, &mut state);
        eprintln!("Sending: {}", response);

        if writeln!(stream, "{}", response).is_err() {
            break;
        }
        if stream.flush().is_err() {
            break;
        }
    }

    eprintln!("Client disconnected");
}

fn handle_request(request: &str, state: &mut DeviceState) -> String {
    let mut parts = request.split_whitespace();
    let verb = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    // Everything that changes device state is write-protected.
    let protected = matches!(verb, "PR" | "PO" | "AD" | "PS" | "FU" | "HO" | "TI")
        && (!args.is_empty() || matches!(verb, "PR" | "HO"));
    if protected && !state.protection_lifted && verb != "PR" {
        return "NO G".to_string();
    }

    match verb {
        "PW" => {
            if args.first() == Some(&PASSWORD) {
                state.authenticated = true;
                "PW".to_string()
            } else {
                "NO P".to_string()
            }
        }
        "PR" => {
            if state.authenticated {
                state.protection_lifted = true;
                "PR 0".to_string()
            } else {
                "NO G".to_string()
            }
        }
        "PO" => match args.as_slice() {
            [] => format!("PO {:.4} {:.4}", state.azimuth, state.zenith),
            [motor, value] => {
                let Ok(value) = value.parse::<f64>() else {
                    return "NO 5".to_string();
                };
                match *motor {
                    "0" => state.azimuth = value,
                    "1" => state.zenith = value,
                    _ => return "NO 5".to_string(),
                }
                format!("PO {:.4}", value)
            }
            _ => "NO 5".to_string(),
        },
        "CP" => {
            // Instant motion: encoders read target plus adjustment.
            format!(
                "CP {:.4} {:.4}",
                state.azimuth + state.adjust_azimuth,
                state.zenith + state.adjust_zenith
            )
        }
        "AD" => match args.as_slice() {
            [] => format!("AD {:.4} {:.4}", state.adjust_azimuth, state.adjust_zenith),
            [motor, value] => {
                let Ok(step) = value.parse::<f64>() else {
                    return "NO 5".to_string();
                };
                if step.abs() > 0.2 {
                    return "NO B".to_string();
                }
                match *motor {
                    "0" => state.adjust_azimuth += step,
                    "1" => state.adjust_zenith += step,
                    _ => return "NO 5".to_string(),
                }
                "AD".to_string()
            }
            _ => "NO 5".to_string(),
        },
        "LL" => "LL 41.6636 -4.7056 935".to_string(),
        "PS" => match args.as_slice() {
            [] => format!("PS {}", u8::from(state.power_save)),
            [value] => {
                state.power_save = *value == "1";
                "PS".to_string()
            }
            _ => "NO 5".to_string(),
        },
        "FU" => match args.as_slice() {
            [] => format!("FU {}", state.function),
            [value] => match value.parse::<u8>() {
                Ok(code) => {
                    state.function = code;
                    "FU".to_string()
                }
                Err(_) => "NO 5".to_string(),
            },
            _ => "NO 5".to_string(),
        },
        "SI" => "SI 100.2 100.5 99.9 100.1".to_string(),
        "IS" => "IS 0".to_string(),
        "QS" => "QS 0".to_string(),
        "VE" => "VE 8.107".to_string(),
        "TI" => {
            let now = Utc::now();
            format!(
                "TI {} {} {} {} {}",
                now.year(),
                now.ordinal(),
                now.hour(),
                now.minute(),
                now.second()
            )
        }
        "HO" => {
            state.azimuth = 0.0;
            state.zenith = 90.0;
            "HO".to_string()
        }
        _ => "NO 3".to_string(),
    }
}
