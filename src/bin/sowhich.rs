use std::process::ExitCode;

use argh::FromArgs;

use sotools::resolve;

#[derive(FromArgs)]
/// Resolve an ELF shared object from its soname, tracing the attempts the
/// dynamic loader would make.
struct Options {
    /// trace resolving attempts while searching for the library.
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// the library name to search for.
    #[argh(positional)]
    soname: String,
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

    match resolve(&opts.soname, &[], &[], None) {
        Some(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}
