use std::borrow::Borrow;

use clap::Parser;
use clap::ValueEnum;
use pocketmap::KeyKind;
use pocketmap::PocketMap;
use pocketmap::Str;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Keys {
    /// `i64` keys.
    Int,
    /// Decimal strings short enough to stay inline.
    Short,
    /// Strings that always spill to the heap.
    Long,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Number of entries to insert. Defaults to the target capacity.
    #[arg(short = 'n', long = "entries")]
    entries: Option<usize>,

    #[arg(short = 'k', long = "keys", value_enum, default_value_t = Keys::Short)]
    keys: Keys,

    /// Fraction of the inserted entries to remove again afterwards.
    #[arg(short = 'r', long = "remove_fraction", default_value_t = 0.0)]
    remove_fraction: f64,
}

fn run<K: KeyKind>(args: &Args, key: impl Fn(usize) -> K::Owned)
where
    K::Owned: Borrow<K::Borrowed>,
{
    println!(
        "Creating PocketMap<{}, int64> with target capacity: {}",
        K::NAME,
        args.target_capacity
    );

    let mut map: PocketMap<K, i64> = PocketMap::with_capacity(args.target_capacity);
    println!("Actual capacity: {}", map.capacity());

    let num_values = args.entries.unwrap_or(args.target_capacity);
    let mut num_failures = 0;
    for i in 0..num_values {
        if let Err(err) = map.insert(Borrow::<K::Borrowed>::borrow(&key(i)), i as i64) {
            println!("insert #{i} failed: {err}");
            num_failures += 1;
        }
    }
    println!(
        "Inserted {} values, capacity is now {}",
        map.len(),
        map.capacity()
    );

    let num_removed = (num_values as f64 * args.remove_fraction.clamp(0.0, 1.0)) as usize;
    for i in 0..num_removed {
        map.remove(Borrow::<K::Borrowed>::borrow(&key(i)));
    }
    if num_removed > 0 {
        println!("Removed {num_removed} values");
    }

    map.raw().stats().print();

    println!("=== Probe Length Histogram ===");
    let histogram = map.raw().probe_histogram();
    let total: usize = histogram.iter().sum();
    for (steps, &count) in histogram.iter().enumerate() {
        println!(
            "{:>3} groups: {:>9} ({:.2}%)",
            steps,
            count,
            count as f64 / total.max(1) as f64 * 100.0
        );
    }

    println!(
        "Number of failed inserts: {} ({:.02}%)",
        num_failures,
        num_failures as f64 / num_values.max(1) as f64 * 100.0
    );
}

fn main() {
    let args = Args::parse();

    match args.keys {
        Keys::Int => run::<i64>(&args, |i| i as i64),
        Keys::Short => run::<Str>(&args, |i| i.to_string()),
        Keys::Long => run::<Str>(&args, |i| format!("a long key that spills: {i:032}")),
    }
}
