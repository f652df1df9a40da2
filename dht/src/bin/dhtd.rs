//! Reference binary for the DHT core: binds a UDP socket, optionally bootstraps against a
//! known host:port, and periodically re-registers itself so it stays reachable by find-value.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use log::{info, warn, LevelFilter};
use rand::thread_rng;
use stakker::{actor, call, ret_nop};

use dht::id::Identifier;
use dht::node::Node;
use dht::Dht;

#[derive(Parser)]
#[command(name = "dhtd", about = "Reference DHT peer-discovery node")]
struct Args {
	/// Local UDP address to bind, e.g. 0.0.0.0:7000.
	#[arg(long, default_value = "0.0.0.0:7000")]
	bind: SocketAddr,

	/// A known peer's host:port to bootstrap from. Omit to start a fresh network.
	#[arg(long)]
	bootstrap: Option<String>,

	/// Claim global (non-NATed) reachability instead of the default NATed assumption.
	#[arg(long)]
	global: bool,

	/// Seconds between registration passes.
	#[arg(long, default_value_t = 300)]
	register_interval: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	log::set_boxed_logger(Box::new(runtime::Logger)).map_err(|err| err.to_string())?;
	log::set_max_level(LevelFilter::Info);

	let args = Args::parse();
	let self_id = Identifier::random(&mut thread_rng());

	info!("Starting node {self_id:?} on {}", args.bind);

	let mut stakker = runtime::init();
	let s = &mut stakker;

	let dht = actor!(s, Dht::init(args.bind, self_id, args.global), ret_nop!());

	if let Some(hostport) = args.bootstrap.clone() {
		let (host, port) = match hostport.rsplit_once(':') {
			Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
			None => {
				warn!("Invalid bootstrap address {hostport}, ignoring");
				(String::new(), 0)
			}
		};

		if port != 0 {
			let ret = stakker::ret_some_to!([dht], |nodes: Vec<Node>| {
				info!("Bootstrap complete: {} node(s) known", nodes.len());
			});
			call!([dht], find_node_by_endpoint(host, port, ret));
		}
	}

	let interval = Duration::from_secs(args.register_interval);
	schedule_register(&dht, s, interval);

	runtime::exec(&mut stakker, || {})?;
	Ok(())
}

fn schedule_register(dht: &stakker::Actor<Dht>, s: &mut stakker::Stakker, interval: Duration) {
	let dht = dht.clone();
	call!([dht], register_node());

	let dht2 = dht.clone();
	s.timer_add(s.now() + interval, move |s| {
		schedule_register(&dht2, s, interval);
	});
}
