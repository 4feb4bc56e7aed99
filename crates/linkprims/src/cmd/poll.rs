use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use linkprims_exchange::{Delivery, HandlerMode, MessageHandler};
use linkprims_param::codec::{iso_request, read_request, RWV_NAME};
use linkprims_wire::protocol::{CMD_ISO_MON_VAR, CMD_ISO_VAR, IDENT_READ};
use tracing::{debug, info};

use crate::cmd::{check_key_count, parse_duration, read, PollArgs};
use crate::device::{Device, DeviceArgs};
use crate::exit::{CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_sample, OutputFormat};

const ISO_ID: u8 = 1;
const TICK: Duration = Duration::from_millis(10);
const WAKE: Duration = Duration::from_millis(200);

pub fn run(args: PollArgs, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    check_key_count(args.keys.len())?;
    let interval = parse_duration(&args.interval)?;
    let interval_ms = u16::try_from(interval.as_millis())
        .map_err(|_| CliError::usage(format!("interval {} exceeds {}ms", args.interval, u16::MAX)))?;
    let device = Arc::new(Device::open(device)?);
    let indices = device.indices(&args.keys)?;

    let command = if args.monitor { CMD_ISO_MON_VAR } else { CMD_ISO_VAR };
    let sender_id = device.exchange.next_ident();
    let read = read_request(IDENT_READ, args.field.flag() | RWV_NAME, 0, &indices);
    let message = device.message(command, sender_id, iso_request(ISO_ID, interval_ms, 0, &read))?;

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let handler: Arc<dyn MessageHandler> = Arc::new(move |delivery: Delivery| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(delivery);
        }
    });
    if !device
        .exchange
        .submit(message, Some(handler), HandlerMode::Inline, 0)
    {
        return Err(CliError::new(FAILURE, "poll request was not accepted"));
    }
    info!(interval_ms, monitor = args.monitor, parameters = indices.len(), "polling");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    let ticker = spawn_ticker(Arc::clone(&device), running.clone())?;

    let mut printed = 0usize;
    let result = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(SUCCESS);
        }
        match rx.recv_timeout(WAKE) {
            Ok(Delivery::Reply(reply)) => {
                let parameters = match read::decode(&reply, indices.len()) {
                    Ok(parameters) => parameters,
                    Err(err) => break Err(err),
                };
                printed = printed.saturating_add(1);
                print_sample(printed, &parameters, args.field.fields(), reply.data(), format);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(SUCCESS);
                }
            }
            Ok(Delivery::Failed { error, .. }) => {
                break Err(CliError::new(TRANSPORT_ERROR, format!("poll request failed: {error}")));
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break Ok(SUCCESS),
        }
    };

    running.store(false, Ordering::SeqCst);
    let _ = ticker.join();
    let cancel = iso_request(ISO_ID, 0, 0, &read);
    let cancelled = device
        .message(command, sender_id, cancel)
        .map(|message| device.exchange.submit(message, None, HandlerMode::Inline, 0));
    debug!(cancelled = cancelled.unwrap_or(false), printed, "poll stopped");
    result
}

/// Drive the device's task scheduler until `running` clears.
fn spawn_ticker(device: Arc<Device>, running: Arc<AtomicBool>) -> CliResult<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("linkprims-ticker".into())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                device.exchange.service_tasks();
                thread::sleep(TICK);
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start ticker: {err}")))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
