use std::path::Path;

use clap::{CommandFactory, FromArgMatches};
use colored::{Color, Colorize};

use vvtest::batch::create_batch_backend;
use vvtest::batch::driver::{BatchOptions, run_batch};
use vvtest::batch::runjob::run_job;
use vvtest::common::cli::{RootOptions, RunJobOpts, RunOpts, SubCommand};
use vvtest::common::setup::setup_logging;
use vvtest::common::utils::fs::absolute_path;
use vvtest::config::RunConfig;
use vvtest::exec::direct::{DirectOptions, run_direct};
use vvtest::exec::launcher::LocalLauncher;
use vvtest::platform::Platform;
use vvtest::testlist::file::load_test_list;
use vvtest::testlist::results::{ResultsFile, ResultsSummary};

// Commands

async fn command_run(opts: RunOpts) -> vvtest::Result<i32> {
    let config = RunConfig::from_opts(&opts)?;
    let mut graph = load_test_list(&absolute_path(opts.test_list))?;
    let mut results = ResultsFile::create(&config.results_file, graph.len())?;

    if opts.batch {
        let mut backend = create_batch_backend(&config.batch, &config.platform)?;
        let options = BatchOptions::from_config(&config)?;
        let summary = run_batch(&mut graph, backend.as_mut(), &mut results, &options).await?;
        if summary.interrupted {
            log::warn!("Batch run was interrupted");
        }
    } else {
        let platform = Platform::from_config(&config.platform);
        let mut launcher = LocalLauncher::new(config.test_root.clone());
        let options = DirectOptions {
            poll_interval: config.poll_interval,
            status_interval: config.status_interval,
        };
        let summary =
            run_direct(&mut graph, platform, &mut launcher, &mut results, &options).await?;
        if !summary.launch_failures.is_empty() {
            log::warn!("{} tests could not be started", summary.launch_failures.len());
        }
    }

    let summary = ResultsSummary::from_graph(&graph);
    print_summary(&summary, results.path());
    Ok(summary.exit_code())
}

async fn command_run_job(opts: RunJobOpts) -> vvtest::Result<i32> {
    let summary = run_job(&absolute_path(opts.job_file)).await?;
    log::info!(
        "Batch job finished: {} pass, {} fail",
        summary.pass,
        summary.fail
    );
    // test failures are reported through the results file
    Ok(0)
}

fn print_summary(summary: &ResultsSummary, results_file: &Path) {
    let counts = [
        ("pass", summary.pass, Color::Green),
        ("diff", summary.diff, Color::Yellow),
        ("fail", summary.fail, Color::Red),
        ("timeout", summary.timeout, Color::Red),
        ("notdone", summary.notdone, Color::Magenta),
        ("notrun", summary.notrun, Color::Magenta),
        ("skip", summary.skip, Color::Cyan),
    ];
    let parts: Vec<String> = counts
        .iter()
        .filter(|(_, count, _)| *count > 0)
        .map(|(name, count, color)| format!("{count} {name}").as_str().color(*color).to_string())
        .collect();
    if parts.is_empty() {
        println!("Summary: no tests");
    } else {
        println!("Summary: {}", parts.join(", "));
    }
    println!("Results written to {}", results_file.display());
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let result = match top_opts.subcmd {
        SubCommand::Run(opts) => command_run(opts).await,
        SubCommand::RunJob(opts) => command_run_job(opts).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{}", format!("{error}").as_str().red());
            std::process::exit(1);
        }
    }
}
