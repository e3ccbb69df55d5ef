use clap::Parser;
use upcalls::{
    CapabilityId, Heap, Op, Scheduler, SchedulerCreateInfo, UpcallCreateInfo, UpcallError, Value,
};

/// Runs a synthetic workload of ordinary threads and upcalls across capabilities.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// number of capabilities, defaults to the available parallelism
    #[arg(long)]
    capabilities: Option<usize>,
    /// ordinary threads to spawn, spread round robin
    #[arg(long, default_value_t = 8)]
    threads: usize,
    /// upcalls to enqueue, spread round robin
    #[arg(long, default_value_t = 1024)]
    upcalls: usize,
    /// every n-th upcall blocks once before finishing, 0 never blocks
    #[arg(long, default_value_t = 4)]
    block_every: usize,
    /// per capability upcall queue capacity, must be a power of two
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// turns between root scans of a capability's upcall queue
    #[arg(long)]
    scan_interval: Option<usize>,
}

fn job(heap: &Heap, cell: Value, n: i64, block: bool) -> Value {
    let mut code = vec![Op::PushFixnum(n), Op::PushFixnum(2), Op::Mul];
    if block {
        code.push(Op::Block);
    }
    code.push(Op::AddToCell(cell));
    heap.allocate_closure(code)
}

fn run(cli: &Cli) -> Result<(), UpcallError> {
    let mut scheduler = Scheduler::new(SchedulerCreateInfo {
        capabilities: cli.capabilities,
        scan_interval: cli.scan_interval,
        upcall: UpcallCreateInfo {
            queue_capacity: cli.queue_capacity,
        },
        ..Default::default()
    })?;
    let capabilities = scheduler.settings().capabilities;
    let heap = scheduler.heap().clone();
    let thread_total = heap.allocate_cell(0);
    let upcall_total = heap.allocate_cell(0);

    for i in 0..cli.threads {
        let closure = job(&heap, thread_total, i as i64 + 1, i % 2 == 1);
        scheduler.spawn(CapabilityId(i % capabilities), closure)?;
    }
    for i in 0..cli.upcalls {
        let block = cli.block_every != 0 && (i + 1) % cli.block_every == 0;
        let closure = job(&heap, upcall_total, i as i64 + 1, block);
        scheduler.enqueue_upcall(CapabilityId(i % capabilities), closure)?;
    }

    log::info!(
        "running {} threads and {} upcalls on {} capabilities",
        cli.threads,
        cli.upcalls,
        capabilities
    );
    let report = scheduler.run();

    println!("thread total: {:?}", heap.cell_value(thread_total));
    println!("upcall total: {:?}", heap.cell_value(upcall_total));
    println!("{report:#?}");
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
