#[macro_use]
extern crate log;

use simplelog::{Config, LevelFilter, TermLogger, TerminalMode, ColorChoice};
use std::collections::HashMap;
use std::io;

use kademlia_node::Node;

fn main() {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    let mut node_map = HashMap::new();
    let mut next_id = 0u32;

    let seed = Node::new("127.0.0.1", 8900, None);
    let seed_contact = seed.contact();
    node_map.insert(next_id, seed);
    next_id += 1;

    for i in 1..10 {
        let node = Node::new("127.0.0.1", 8900 + i as u16, Some(seed_contact.clone()));
        node_map.insert(next_id, node);
        next_id += 1;
    }

    info!("bootstrapped {} nodes", node_map.len());

    let input = io::stdin();
    loop {
        let mut buffer = String::new();
        println!("Ready for input! (new | put <index> <key> <value> | get <index> <key> | quit)");
        if input.read_line(&mut buffer).is_err() {
            break;
        }
        let args: Vec<&str> = buffer.trim().split(' ').collect();
        match args.as_slice() {
            ["new", bootstrap_index] => {
                let index: u32 = match bootstrap_index.parse() {
                    Ok(index) => index,
                    Err(_) => continue,
                };
                let contact = match node_map.get(&index) {
                    Some(node) => node.contact(),
                    None => continue,
                };
                let node = Node::new("127.0.0.1", 8900 + next_id as u16, Some(contact));
                node_map.insert(next_id, node);
                next_id += 1;
            },
            ["put", index, key, value] => {
                let index: u32 = match index.parse() {
                    Ok(index) => index,
                    Err(_) => continue,
                };
                if let Some(node) = node_map.get(&index) {
                    match node.put(key.as_bytes(), value) {
                        Ok(summary) => info!("stored at {}/{} nodes", summary.accepted, summary.attempted),
                        Err(e) => error!("put failed: {}", e),
                    }
                }
            },
            ["get", index, key] => {
                let index: u32 = match index.parse() {
                    Ok(index) => index,
                    Err(_) => continue,
                };
                if let Some(node) = node_map.get(&index) {
                    match node.get(key.as_bytes()) {
                        Ok(value) => info!("{}", value),
                        Err(e) => error!("get failed: {}", e),
                    }
                }
            },
            ["quit"] => break,
            _ => {},
        }
    }

    for node in node_map.values() {
        node.shutdown();
    }
}
