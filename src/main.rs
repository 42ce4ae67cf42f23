use std::io::Write;
use std::process::exit;

use clap::Parser;
use nix::unistd::Pid;

use remotenv::utils;

/// Read an environment variable from the live environment of a
/// running process.
#[derive(Parser, Debug)]
#[command(name = "remotenv")]
struct Args {
    /// pid of the target process
    #[arg(short = 'p', value_name = "PID", allow_negative_numbers = true)]
    pid: Option<i64>,

    /// name of the environment variable to read
    #[arg(short = 'e', value_name = "NAME")]
    env: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Set logger
    let tool_config = utils::read_config("remotenv");
    pretty_env_logger::formatted_builder()
        .filter_level(tool_config.log_level_filter)
        .init();

    let Some(pid) = args.pid else {
        eprintln!("must specify a remote process with -p");
        exit(1);
    };
    if pid < 0 {
        eprintln!("cannot accept negative pids");
        exit(1);
    }
    let Ok(pid) = i32::try_from(pid) else {
        eprintln!("pid {} is out of range", pid);
        exit(1);
    };
    let Some(name) = args.env else {
        eprintln!("must specify an env var with -e");
        exit(1);
    };

    let pid = Pid::from_raw(pid);
    match utils::process_name(pid) {
        Some(process_name) => log::info!("target pid {} is `{}`", pid, process_name),
        None => log::warn!("pid {} not found in the process table", pid),
    }

    match remotenv::read_remote_env(pid, &name) {
        Ok(Some(value)) => {
            let mut stdout = std::io::stdout().lock();
            let written = stdout
                .write_all(&value)
                .and_then(|()| stdout.write_all(b"\n"));
            if let Err(error) = written {
                eprintln!("could not write the value: {}", error);
                exit(1);
            }
        }
        Ok(None) => {}
        Err(error) => {
            eprintln!("{}", error);
            exit(1);
        }
    }
}
