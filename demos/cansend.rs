use canbridge::{Channel, Frame, logging};
use log::error;
use std::process;

const LOG_TARGET: &str = "cansend";

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [interface, frame] = args.as_slice() else {
        eprintln!("usage: cansend <interface> <id>#<data>");
        eprintln!("   eg: cansend vcan0 123#DEADBEEF");
        eprintln!("       cansend vcan0 1F334455#R");
        process::exit(2);
    };

    let frame: Frame = match frame.parse() {
        Ok(frame) => frame,
        Err(e) => {
            error!(target: LOG_TARGET, "{}", e);
            process::exit(2);
        }
    };

    let result = (|| -> canbridge::Result<()> {
        let channel = Channel::open(interface, false)?;
        channel.set_rx_filters(&[])?;
        channel.start()?;
        let sent = channel.send(&frame);
        channel.stop()?;
        sent
    })();

    if let Err(e) = result {
        error!(target: LOG_TARGET, "{}", e);
        process::exit(1);
    }
}
