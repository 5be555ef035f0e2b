//! Simulate a bulk transfer between two endpoints.
//!
//! Call example:
//!
//! * `tcb-sim --bytes 10000000 --loss 0.02 --delay 50 --seed 7`
use tcb_sim::{config, logger};

fn main() {
    let config = config::Config::from_args();
    if config.verbose {
        logger::install(log::LevelFilter::Trace);
    }

    println!("[+] Transferring {} bytes, {}ms one-way delay, {} loss",
        config.bytes, config.delay, config.loss);

    match tcb_sim::run(&config) {
        Ok(score) => {
            println!("[+] Done\n");
            println!("{}", score);
            if !score.clean() {
                std::process::exit(1);
            }
        },
        Err(err) => {
            eprintln!("[-] Could not set up the endpoints: {}", err);
            std::process::exit(2);
        },
    }
}
