//! An example app for how to use configloader.
//!
//! ```text
//! cargo run --example configloader --features clap -- config --output json
//! cargo run --example configloader --features clap -- --config ./a.yml foo
//! RUST_LOG=configloader=trace cargo run --example configloader --features clap -- config
//! ```

use std::collections::BTreeMap;
use std::io;
use std::process::ExitCode;

use clap::Command;
use configloader::cli::{config_command, run_config_command, SourceFlags};
use configloader::{ConfigLoader, DirSource, FileSource, Sources, ValueTemplateUnmarshal};
use tracing::Dispatch;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

type Cfg = BTreeMap<String, serde_yaml::Value>;

fn default_sources() -> Sources<Cfg> {
    let templated = ValueTemplateUnmarshal::default;
    Sources::new()
        .with_file("/etc/configloader.yml")
        .with_source(FileSource::new("/etc/configloader.tmpl.yml").with_unmarshal(templated()))
        .with_dir("/etc/configloader.d")
        .with_source(DirSource::new("/etc/configloader.tmpl.d").with_unmarshal(templated()))
        .with_file("~/.config/configloader.yml")
        .with_source(FileSource::new("~/.config/configloader.tmpl.yml").with_unmarshal(templated()))
        .with_dir("~/.config/configloader.d")
        .with_source(DirSource::new("~/.config/configloader.tmpl.d").with_unmarshal(templated()))
}

fn logger() -> Dispatch {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    Dispatch::new(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .with(filter),
    )
}

fn main() -> ExitCode {
    let mut loader = ConfigLoader::<Cfg>::builder()
        .with_default_sources(default_sources())
        .with_json_output()
        .with_dispatch(logger())
        .build();

    let flags = SourceFlags::<Cfg>::new()
        .file("config", "location of one or more config files")
        .dir("config-dir", "location of one or more config directories");

    let root = Command::new("configloader")
        .about("An example app for how to use configloader.")
        .subcommand_required(true)
        .subcommand(config_command(&loader))
        .subcommand(
            Command::new("foo")
                .about("An example subcommand for how to use configloader to show the value of foo."),
        );
    let matches = flags.register(root).get_matches();
    flags.apply(&matches, &mut loader);

    let result = match matches.subcommand() {
        Some(("config", sub)) => run_config_command(&mut loader, sub, &mut io::stdout()),
        Some(("foo", _)) => loader.config().map(|cfg| match cfg.get("foo") {
            Some(foo) => {
                let rendered = serde_yaml::to_string(foo).unwrap_or_default();
                println!("foo is [{}]", rendered.trim_end());
            }
            None => println!("foo is not set"),
        }),
        _ => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
