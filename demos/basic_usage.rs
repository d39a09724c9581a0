use kademlia_node::Node;

fn main() {
    // A lone node's routing table has no peers to store to or fetch from
    // (self has no bucket, spec's "distance zero has no bucket"), so a
    // minimal working example needs at least a bootstrapped pair.
    let seed = Node::new("127.0.0.1", 0, None);
    let node = Node::new("127.0.0.1", 0, Some(seed.contact()));

    node.put(b"Hello", "World").expect("put should succeed against the bootstrapped seed");
    assert_eq!(seed.get(b"Hello").unwrap(), "World");

    node.shutdown();
    seed.shutdown();
}
