use std::process::ExitCode;

use argh::FromArgs;

use sotools::ldd;

#[derive(FromArgs)]
/// List the dynamic dependencies of an ELF executable, resolved with the
/// documented dynamic loader rules and without running the binary.
struct Options {
    /// trace resolving attempts while searching for the dependencies.
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// path to an executable to analyze.
    #[argh(positional)]
    executable: String,
}

fn main() -> ExitCode {
    let opts: Options = argh::from_env();

    if opts.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_target(false)
            .without_time()
            .init();
    }

    match ldd(&opts.executable) {
        Ok(libraries) => {
            println!("{}", libraries.ldd_format().join("\n"));
            ExitCode::SUCCESS
        }
        Err(_) => {
            println!("\tnot a dynamic executable");
            ExitCode::FAILURE
        }
    }
}
