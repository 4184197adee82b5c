use std::rc::Rc;

use clap::Parser;
use intern_set::InterningSet;
use intern_set::SlotKind;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Percentage of values discarded after filling, leaving tombstones.
    #[arg(short = 'd', long = "discard_percent", default_value_t = 25)]
    discard_percent: usize,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating InterningSet with target capacity: {}",
        args.target_capacity
    );

    let mut set: InterningSet<Rc<str>> = InterningSet::with_capacity(args.target_capacity);

    println!("Actual capacity: {}", set.capacity());
    println!("Interning identifiers...");

    let num_values = args.target_capacity;
    for i in 0..num_values {
        let name = format!("identifier_{i}");
        let canonical = set.add(Rc::from(name.as_str())).unwrap();

        // Interning a second copy must hand back the stored handle.
        let again = set.add(Rc::from(name.as_str())).unwrap();
        assert!(Rc::ptr_eq(&canonical, &again), "{name} was stored twice");
    }

    let to_discard = num_values * args.discard_percent.min(100) / 100;
    for i in 0..to_discard {
        let name = format!("identifier_{i}");
        assert!(set.discard(&name).unwrap());
        assert_eq!(set.lookup_slot(&name).unwrap().kind(), SlotKind::Tombstone);
    }

    println!("Interned {} values into set", set.len());
    println!(
        "Final load factor: {:.2}%",
        (set.len() as f64 / set.capacity() as f64) * 100.0
    );

    set.probe_histogram().print();
    set.debug_stats().print();

    let tombstones = set.used() - set.len();
    println!(
        "Tombstones after discarding {} values: {} ({:.02}% of used slots)",
        to_discard,
        tombstones,
        tombstones as f64 / set.used().max(1) as f64 * 100.0
    );
    println!("Memory usage: {} bytes", set.memory_usage());
}
