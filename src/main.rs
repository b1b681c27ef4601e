use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_cargo::style::CLAP_STYLING;
use env_logger::{Builder, Env};
use zmm::huge::HugeListEnd;
use zmm::{Heap, bins, chunks, classify, freelist, huge};

mod gdb;
mod mi;
mod probe;
mod report;

use gdb::GdbSession;

/// Survey the Zend Memory Manager heap of a live PHP process or core dump
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, styles = CLAP_STYLING)]
struct Args {
    /// Attach to a running PHP process
    #[arg(short, long, conflicts_with_all = ["core", "remote"])]
    pid: Option<i32>,

    /// Read from a core dump instead of a live process
    #[arg(long, requires = "exe", conflicts_with = "remote")]
    core: Option<PathBuf>,

    /// PHP executable, for symbols when reading a core dump
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Connect to nc session
    ///
    /// `mkfifo gdb_pipe; cat gdb_pipe | gdb --interpreter=mi2 | nc -l -p 12345 > gdb_pipe`
    #[arg(short, long)]
    remote: Option<SocketAddr>,

    /// Override gdb executable path
    #[arg(long)]
    gdb_path: Option<String>,

    /// Switch into 32-bit mode
    ///
    /// The pointer width is probed from the target when possible,
    /// but this will force the pointers to be evaluated as 32 bit
    #[arg(long)]
    #[arg(value_enum)]
    #[arg(default_value_t = PtrSize::default())]
    ptr_size: PtrSize,

    /// Address of the zend_mm_heap, bypassing symbol lookup
    ///
    /// Accepts hex (0x...) or decimal. Needed for targets without
    /// debug symbols, or ZTS builds where alloc_globals does not exist.
    #[arg(long, value_parser = parse_addr)]
    heap: Option<u64>,

    /// Path to write log
    ///
    /// Set env `RUST_LOG` to change log level
    #[arg(long)]
    log_path: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Walk every small-bin free list and print the chains
    ///
    /// PHP 8.3+ XOR-poisons the next pointers, so chains there will end
    /// early in garbage. Reliable on 8.0 through 8.2.
    FreeLists {
        /// Only walk this bin (0-29)
        #[arg(long)]
        bin: Option<u32>,

        /// Stop a walk after this many nodes
        #[arg(long, default_value_t = freelist::WALK_CAP)]
        cap: usize,
    },
    /// Decide which allocation each address points into
    Classify {
        /// Addresses (hex or decimal) or C expressions evaluated in the target
        #[arg(required = true)]
        exprs: Vec<String>,
    },
    /// Walk the chunk ring and census each chunk's page map
    Chunks,
    /// List out-of-band huge allocations
    Huge,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum PtrSize {
    #[value(name = "32")]
    Size32,
    #[value(name = "64")]
    Size64,
    #[default]
    Auto,
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|err| format!("invalid address `{s}`: {err}"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_path.as_ref())?;

    let mut session = connect(&args)?;
    match args.ptr_size {
        PtrSize::Size32 => session.set_ptr_len(4),
        PtrSize::Size64 => session.set_ptr_len(8),
        PtrSize::Auto => {
            session.probe_ptr_len();
        }
    }
    session.probe_endian();

    let heap_addr = probe::find_heap(&mut session, args.heap)?;
    let layout = probe::discover_layout(&mut session);
    let heap = Heap::new(heap_addr, layout);

    match &args.cmd {
        Cmd::FreeLists { bin, cap } => cmd_free_lists(&mut session, &heap, *bin, *cap)?,
        Cmd::Classify { exprs } => cmd_classify(&mut session, &heap, exprs)?,
        Cmd::Chunks => cmd_chunks(&mut session, &heap)?,
        Cmd::Huge => cmd_huge(&mut session, &heap)?,
    }

    if args.pid.is_some() {
        session.detach();
    }
    Ok(())
}

fn connect(args: &Args) -> Result<GdbSession> {
    if let Some(remote) = args.remote {
        return GdbSession::connect(remote);
    }
    if args.pid.is_none() && args.core.is_none() {
        bail!("no target: use --pid, --core (with --exe), or --remote");
    }
    let mut session =
        GdbSession::spawn(args.gdb_path.as_deref(), args.exe.as_deref(), args.core.as_deref())?;
    if let Some(pid) = args.pid {
        session.attach(pid)?;
    }
    Ok(session)
}

fn cmd_free_lists(
    session: &mut GdbSession,
    heap: &Heap,
    bin: Option<u32>,
    cap: usize,
) -> Result<()> {
    let bins_to_walk: Vec<u32> = match bin {
        Some(bin) => {
            if bin >= bins::COUNT {
                bail!("bin {bin} out of range, the allocator has {} size classes", bins::COUNT);
            }
            vec![bin]
        }
        None => (0..bins::COUNT).collect(),
    };
    for bin in bins_to_walk {
        let walk = heap
            .walk_bin(session, bin, cap)
            .with_context(|| format!("free list head for bin {bin} unreadable"))?;
        println!("{}", report::free_list_line(bin, &walk));
    }
    Ok(())
}

fn cmd_classify(session: &mut GdbSession, heap: &Heap, exprs: &[String]) -> Result<()> {
    for expr in exprs {
        // bare addresses skip the round trip through the target
        let addr = match parse_addr(expr) {
            Ok(addr) => addr,
            Err(_) => match session.eval_integer(expr) {
                Ok(addr) => addr,
                Err(err) => {
                    println!("{expr}: {err}");
                    continue;
                }
            },
        };
        let what = classify(session, heap, addr);
        println!("{}", report::classification_line(addr, &what));
    }
    Ok(())
}

fn cmd_chunks(session: &mut GdbSession, heap: &Heap) -> Result<()> {
    let ring = chunks::ring(session, heap).context("chunk ring unreadable")?;
    for (index, &chunk) in ring.chunks.iter().enumerate() {
        let header = chunks::read_header(session, &heap.layout, chunk);
        let map = chunks::read_map(session, &heap.layout, chunk);
        match (header, map) {
            (Ok(header), Ok(map)) => {
                let summary = chunks::summarize(&map);
                println!("{}", report::chunk_line(index, chunk, &header, &summary));
            }
            _ => println!("{}", report::chunk_line_unreadable(index, chunk)),
        }
    }
    if let Some(note) = report::ring_end_note(ring.end, ring.chunks.len()) {
        println!("{note}");
    }
    Ok(())
}

fn cmd_huge(session: &mut GdbSession, heap: &Heap) -> Result<()> {
    let list = huge::list(session, heap);
    if list.blocks.is_empty() && list.end == HugeListEnd::Done {
        println!("no huge allocations");
    }
    for (index, block) in list.blocks.iter().enumerate() {
        println!("{}", report::huge_line(index, block));
    }
    if let Some(note) = report::huge_end_note(list.end, list.blocks.len()) {
        println!("{note}");
    }
    Ok(())
}

fn init_logging(log_path: Option<&String>) -> Result<()> {
    if let Some(log_path) = log_path {
        let log_file =
            Arc::new(Mutex::new(File::create(log_path).context("Could not create log file")?));
        Builder::from_env(Env::default().default_filter_or("info"))
            .format(move |buf, record| {
                let mut log_file = log_file.lock().unwrap();
                let log_msg = format!(
                    "{} [{}] - {}\n",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                );
                log_file.write_all(log_msg.as_bytes()).unwrap();
                writeln!(buf, "{}", log_msg.trim_end())
            })
            .target(env_logger::Target::Pipe(Box::new(std::io::sink()))) // Disable stdout/stderr
            .init();
    } else {
        // survey output owns stdout, logs go to stderr
        Builder::from_env(Env::default().default_filter_or("warn")).init();
    }
    Ok(())
}
