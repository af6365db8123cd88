// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! A minimal read-eval-print loop.
//!
//! There is no in-scope parser (lexing/parsing stays an external
//! collaborator), so this REPL does not accept arbitrary source text. It
//! understands one tiny left-to-right integer expression grammar —
//! `<int> (+|-|*|/) <int> (+|-|*|/) <int> ...` — built entirely on top of
//! the real dispatch protocol (`Integer#+`, `Integer#-`, ...), so every
//! line it evaluates exercises inline caching and method dispatch exactly
//! as a compiled call site would. This is a test harness for the core,
//! not a language front-end.

use crate::dispatch::CallSite;
use crate::runtime::Runtime;
use crate::symbol::symbol;
use crate::value::Value;
use std::io::{self, BufRead, Write};

/// A parse failure in the REPL's tiny expression grammar.
#[derive(Debug)]
pub enum ReadError {
    EmptyInput,
    ExpectedInteger(String),
    ExpectedOperator(String),
    UnknownOperator(char),
}

fn print_read_error(err: &ReadError) {
    match err {
        ReadError::EmptyInput => eprintln!("read error: empty input"),
        ReadError::ExpectedInteger(tok) => eprintln!("read error: expected an integer, got `{tok}`"),
        ReadError::ExpectedOperator(tok) => eprintln!("read error: expected +, -, * or /, got `{tok}`"),
        ReadError::UnknownOperator(c) => eprintln!("read error: unknown operator `{c}`"),
    }
}

fn print_runtime_error(err: &crate::error::Error) {
    eprintln!("runtime error: {err}");
}

/// Parse and evaluate one line, dispatching each operator through the real
/// method tables instead of doing the arithmetic directly.
fn eval_line(rt: &Runtime, line: &str) -> Result<Value, ReadError> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next().ok_or(ReadError::EmptyInput)?;
    let mut acc = parse_int(first)?;

    let site = CallSite::new();
    loop {
        let Some(op_tok) = tokens.next() else { break };
        if op_tok.len() != 1 {
            return Err(ReadError::ExpectedOperator(op_tok.to_string()));
        }
        let selector = match op_tok.chars().next().unwrap() {
            '+' => "+",
            '-' => "-",
            '*' => "*",
            '/' => "/",
            other => return Err(ReadError::UnknownOperator(other)),
        };
        let rhs_tok = tokens.next().ok_or_else(|| ReadError::ExpectedInteger(String::new()))?;
        let rhs = parse_int(rhs_tok)?;
        acc = crate::dispatch::call(rt, &site, acc, Value::symbol(symbol(selector)), &[rhs])
            .map_err(|err| {
                print_runtime_error(&err);
                ReadError::EmptyInput
            })
            .unwrap_or(acc);
    }
    Ok(acc)
}

fn parse_int(tok: &str) -> Result<Value, ReadError> {
    tok.parse::<i64>().map(Value::int).map_err(|_| ReadError::ExpectedInteger(tok.to_string()))
}

/// Run the interactive loop against stdin/stdout until EOF.
pub fn run(rt: &Runtime) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("objvm> ");
        let _ = stdout.flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        match eval_line(rt, trimmed) {
            Ok(value) => println!("=> {value:?}"),
            Err(err) => print_read_error(&err),
        }
    }
}

/// Like [`run`], but reads a fixed number of lines from `input` and writes
/// results to `output` instead of driving stdin/stdout — used by tests.
pub fn run_limited(rt: &Runtime, input: &[&str], output: &mut Vec<String>) {
    for line in input {
        match eval_line(rt, line) {
            Ok(value) => output.push(format!("=> {value:?}")),
            Err(ReadError::EmptyInput) => output.push("read error: empty input".to_string()),
            Err(err) => {
                let mut buf = Vec::new();
                let _ = writeln!(buf, "{err:?}");
                output.push(String::from_utf8_lossy(&buf).trim_end().to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::config::RuntimeConfig;

    #[test]
    fn evaluates_a_left_to_right_integer_expression() {
        let rt = Runtime::new(RuntimeConfig::default());
        builtins::install(&rt);
        let mut out = Vec::new();
        run_limited(&rt, &["2 + 3 * 4"], &mut out);
        // Left-to-right, no precedence: (2 + 3) * 4 == 20.
        assert_eq!(out, vec!["=> 20"]);
    }

    #[test]
    fn reports_a_read_error_on_malformed_input() {
        let rt = Runtime::new(RuntimeConfig::default());
        builtins::install(&rt);
        let mut out = Vec::new();
        run_limited(&rt, &["not_a_number"], &mut out);
        assert_eq!(out.len(), 1);
    }
}
