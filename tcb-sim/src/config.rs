use structopt::StructOpt;

use tcb::tcp;
use tcb::time::Duration;

#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "tcb-sim", about = "Transfer data between two endpoints over a lossy link")]
pub struct Config {
    /// Bytes transferred from the client to the server.
    #[structopt(long = "bytes", default_value = "1048576")]
    pub bytes: usize,

    /// Probability that a segment is dropped, in each direction.
    #[structopt(long = "loss", default_value = "0.01")]
    pub loss: f64,

    /// One-way delay of the link in milliseconds.
    #[structopt(long = "delay", default_value = "20")]
    pub delay: u64,

    /// Segment size of both endpoints.
    #[structopt(long = "mss", default_value = "1460")]
    pub mss: usize,

    /// Send and receive buffer size of both endpoints.
    #[structopt(long = "window", default_value = "131072")]
    pub window: usize,

    /// Seed of the loss pattern.
    #[structopt(long = "seed", default_value = "0")]
    pub seed: u64,

    #[structopt(long = "no-timestamps")]
    pub no_timestamps: bool,

    #[structopt(long = "no-window-scaling")]
    pub no_window_scaling: bool,

    /// Log the endpoints to stderr.
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
}

impl Config {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }

    /// The endpoint configuration shared by client and server.
    pub fn tcp(&self) -> tcp::Config {
        tcp::Config {
            segment_size: self.mss,
            send_buffer: self.window,
            recv_buffer: self.window,
            window_scaling: !self.no_window_scaling,
            timestamps: !self.no_timestamps,
            ..tcp::Config::default()
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bytes: 1 << 20,
            loss: 0.01,
            delay: 20,
            mss: 1460,
            window: 131072,
            seed: 0,
            no_timestamps: false,
            no_window_scaling: false,
            verbose: false,
        }
    }
}
