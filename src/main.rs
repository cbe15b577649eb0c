use anyhow::Result;
use callpath::cli::{Cli, OutputFormat};
use callpath::detector::CallPath;
use callpath::frame_capture::BacktraceCapture;
use callpath::registry::{CallerSlots, PathRegistry, Registry};
use callpath::report::ReportBuffer;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// The instrumented function, reached from two different callers
#[inline(never)]
fn target<R: Registry>(detector: &CallPath<R>, report_bytes: usize) -> Result<Option<String>> {
    let mut report = ReportBuffer::with_capacity(report_bytes);
    let first = detector.is_unique_into(&mut report)?;
    Ok(std::hint::black_box(first.then(|| report.into_string())))
}

#[inline(never)]
fn caller_a<R: Registry>(detector: &CallPath<R>, report_bytes: usize) -> Result<Option<String>> {
    let report = target(detector, report_bytes);
    std::hint::black_box(report)
}

#[inline(never)]
fn caller_c<R: Registry>(detector: &CallPath<R>, report_bytes: usize) -> Result<Option<String>> {
    let report = target(detector, std::hint::black_box(report_bytes));
    std::hint::black_box(report)
}

fn run<R: Registry>(detector: CallPath<R>, args: &Cli) -> Result<()> {
    let mut first_seen = 0usize;

    for _ in 0..args.iterations {
        let reports = [
            caller_a(&detector, detector.config().report_capacity)?,
            caller_c(&detector, detector.config().report_capacity)?,
        ];
        for report in reports.into_iter().flatten() {
            first_seen += 1;
            println!("first call path #{}:", first_seen);
            println!("{}", report);
        }
    }

    match args.format {
        OutputFormat::Text => print!("{}", detector.dump()),
        OutputFormat::Json => println!("{}", detector.dump_json()?),
    }

    let stats = detector.stats();
    eprintln!(
        "{} distinct call paths in {} calls ({} saturated)",
        first_seen,
        args.iterations * 2,
        stats.saturated
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = args.detector_config()?;

    if args.bounded {
        run(
            CallPath::with_parts(CallerSlots::new(), BacktraceCapture::new(), config),
            &args,
        )
    } else {
        run(
            CallPath::with_parts(PathRegistry::new(), BacktraceCapture::new(), config),
            &args,
        )
    }
}
