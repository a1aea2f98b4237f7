use canbridge::{Channel, ChannelConfig, ChannelState, Event, SystemConfig, logging};
use log::{error, info};
use std::process;
use std::sync::Arc;
use tokio::sync::Notify;

const LOG_TARGET: &str = "candump";

fn usage() -> ! {
    eprintln!("usage: candump <interface> [-t]");
    eprintln!("       candump --config <file> <alias>");
    process::exit(2);
}

fn channel_config(args: &[String]) -> canbridge::Result<ChannelConfig> {
    match args {
        [flag, path, alias] if flag == "--config" => Ok(SystemConfig::load(path)?.channel(alias)?.clone()),
        [interface] => Ok(ChannelConfig::new(interface)),
        [interface, flag] if flag == "-t" => {
            let mut config = ChannelConfig::new(interface);
            config.timestamps = true;
            Ok(config)
        }
        _ => usage(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match channel_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(target: LOG_TARGET, "{}", e);
            process::exit(1);
        }
    };

    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || trigger.notify_one()) {
        error!(target: LOG_TARGET, "cannot install Ctrl-C handler: {}", e);
        process::exit(1);
    }

    let result = async {
        let channel = Channel::from_config(&config)?;
        let interface = channel.interface().to_string();
        channel.add_listener(move |event| match event {
            Event::Frame(frame) => match frame.timestamp() {
                Some(ts) => println!("({}.{:06}) {} {}", ts.seconds, ts.micros, interface, frame),
                None => println!("{} {}", interface, frame),
            },
            Event::EndOfStream(eos) => error!(target: LOG_TARGET, "{}: {}", eos.interface, eos.reason),
        });
        channel.start()?;
        info!(target: LOG_TARGET, "Listening on {}, Ctrl-C to stop", channel.interface());

        // drain() returns once the receive path fails.
        tokio::select! {
            _ = shutdown.notified() => {}
            _ = channel.drain() => {}
        }
        channel.stop()?;
        Ok::<_, canbridge::Error>(channel.state())
    }
    .await;

    match result {
        Ok(ChannelState::Failed) => process::exit(1),
        Ok(_) => {}
        Err(e) => {
            error!(target: LOG_TARGET, "{}", e);
            process::exit(1);
        }
    }
}
