//! Drive a client and a server endpoint over a simulated link.
//!
//! The client opens a connection, writes the configured number of bytes of the iperf pattern and
//! closes. The server accepts the connection from a listener, reads everything and closes once
//! the client's FIN arrived. Time only advances to the next link arrival or timer deadline so a
//! run is fast and repeatable.
mod endpoint;
mod link;
mod pattern;
mod score;

pub mod config;
pub mod logger;

pub use score::Score;

use std::cell::Cell;
use std::rc::Rc;

use tcb::tcp::{self, Connection, Event, IsnGenerator, KeyService, Open, Ports, State};
use tcb::time::{Duration, Expiration, Instant};
use tcb::wire::Repr;

use endpoint::{Endpoint, Retransmissions};
use link::Link;

const CLIENT_PORT: u16 = 49152;
const SERVER_PORT: u16 = 5001;

/// Simulated time after which a run is abandoned.
const TIME_LIMIT: Duration = Duration::from_secs(3600);

struct Client {
    end: Endpoint,
    written: usize,
    closed: bool,
}

struct Server {
    listener: Endpoint,
    child: Option<Endpoint>,
    retransmitted: Rc<Cell<u32>>,
    received: usize,
    corrupt: usize,
    closed: bool,
}

impl Client {
    /// Write as much of the stream as fits, then close.
    fn step(&mut self, now: Instant, total: usize) -> tcp::Result<()> {
        if self.closed || self.end.conn.state() != State::Established {
            return Ok(());
        }

        let count = self.end.tx.free_space().min(total - self.written);
        if count > 0 {
            let mut chunk = vec![0; count];
            pattern::init(&mut chunk, self.written);
            self.written += self.end.tx.write(&chunk);
            self.end.event(now, |conn, io| conn.submit(io))?;
        }

        if self.written == total {
            self.closed = true;
            self.end.event(now, |conn, io| conn.close(io))?;
        }
        Ok(())
    }
}

impl Server {
    fn arrives(&mut self, now: Instant, repr: &Repr, payload: &[u8]) -> tcp::Result<()> {
        if let Some(child) = &mut self.child {
            if child.conn.ports().remote == repr.src_port {
                child.arrives(now, repr, payload);
                return Ok(());
            }
        }

        let signals = self.listener.arrives(now, repr, payload);
        if signals.accept && self.child.is_none() {
            let mut child = Endpoint::accept(&self.listener.conn, now, repr)?;
            child.conn.add_observer(Box::new(Retransmissions::new(self.retransmitted.clone())));
            log::debug!("accepted connection from port {}", repr.src_port);
            self.child = Some(child);
        }
        Ok(())
    }

    /// Read everything that arrived and close after the end of the stream.
    fn step(&mut self, now: Instant) -> tcp::Result<()> {
        let child = match &mut self.child {
            Some(child) => child,
            None => return Ok(()),
        };

        let mut buf = [0; 4096];
        loop {
            let count = child.rx.read(&mut buf);
            if count == 0 {
                break;
            }
            self.corrupt += pattern::mismatches(&buf[..count], self.received);
            self.received += count;
        }

        if !self.closed && child.app.events.contains(&Event::PeerClosed) {
            self.closed = true;
            child.event(now, |conn, io| conn.close(io))?;
        }
        Ok(())
    }

    fn expire(&mut self, now: Instant) {
        self.listener.expire(now);
        if let Some(child) = &mut self.child {
            child.expire(now);
        }
    }

    fn outgoing(&mut self) -> Vec<Vec<u8>> {
        let mut segments = self.listener.outgoing();
        if let Some(child) = &mut self.child {
            segments.extend(child.outgoing());
        }
        segments
    }

    fn next_deadline(&self) -> Expiration {
        let child = self.child.as_ref().map_or(Expiration::Never, Endpoint::next_deadline);
        self.listener.next_deadline().min(child)
    }

    fn state(&self) -> State {
        self.child.as_ref().map_or(self.listener.conn.state(), |child| child.conn.state())
    }
}

/// Transfer the configured stream and score the run.
pub fn run(config: &config::Config) -> tcp::Result<Score> {
    let tcp = config.tcp();
    let keys: Rc<dyn KeyService> = Rc::new(IsnGenerator::new(config.seed, 0x7463_622d_7369_6d));
    let retransmitted = Rc::new(Cell::new(0));

    let ports = Ports { local: CLIENT_PORT, remote: SERVER_PORT };
    let mut conn = Connection::new(tcp.clone(), ports, keys.clone())?;
    conn.add_observer(Box::new(Retransmissions::new(retransmitted.clone())));
    let mut client = Client { end: Endpoint::new(conn), written: 0, closed: false };

    let ports = Ports { local: SERVER_PORT, remote: 0 };
    let mut server = Server {
        listener: Endpoint::new(Connection::new(tcp, ports, keys)?),
        child: None,
        retransmitted: retransmitted.clone(),
        received: 0,
        corrupt: 0,
        closed: false,
    };

    let mut upstream = Link::new(config.delay(), config.loss, config.seed, 0);
    let mut downstream = Link::new(config.delay(), config.loss, config.seed, 1);

    let mut now = Instant::ZERO;
    let mut finished = None;
    server.listener.event(now, |conn, io| conn.open(io, Open::Passive))?;
    client.end.event(now, |conn, io| conn.open(io, Open::Active))?;

    loop {
        while let Some(bytes) = upstream.recv(now) {
            match endpoint::decode(&bytes) {
                Ok((repr, payload)) => server.arrives(now, &repr, payload)?,
                Err(err) => log::warn!("dropping undecodable segment: {}", err),
            }
        }
        while let Some(bytes) = downstream.recv(now) {
            match endpoint::decode(&bytes) {
                Ok((repr, payload)) => { client.end.arrives(now, &repr, payload); },
                Err(err) => log::warn!("dropping undecodable segment: {}", err),
            }
        }

        client.end.expire(now);
        server.expire(now);

        client.step(now, config.bytes)?;
        server.step(now)?;

        for bytes in client.end.outgoing() {
            upstream.send(now, bytes);
        }
        for bytes in server.outgoing() {
            downstream.send(now, bytes);
        }

        if finished.is_none() && server.closed {
            finished = Some(now);
        }
        if client.end.conn.state() == State::Closed && server.state() == State::Closed {
            break;
        }

        let next = upstream.next_arrival()
            .min(downstream.next_arrival())
            .min(client.end.next_deadline())
            .min(server.next_deadline());
        match next {
            Expiration::When(at) if at <= Instant::ZERO + TIME_LIMIT => now = now.max(at),
            Expiration::When(_) => {
                log::warn!("giving up after {:?} of simulated time", TIME_LIMIT);
                break;
            },
            Expiration::Never => {
                log::warn!("both endpoints are idle without completing");
                break;
            },
        }
    }

    if server.corrupt > 0 {
        log::warn!("{} received bytes deviate from the pattern", server.corrupt);
    }

    Ok(Score {
        data_len: server.received as u64,
        time: finished.unwrap_or(now) - Instant::ZERO,
        sent: upstream.sent + downstream.sent,
        dropped: upstream.dropped + downstream.dropped,
        retransmitted: retransmitted.get(),
        client: client.end.conn.state(),
        server: server.state(),
    })
}
