#![allow(dead_code)]

pub mod mocks;

use std::{fs, path::Path};

pub use mocks::MockPersonWriter;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `count` valid person lines, numbered from `first`.
pub fn person_lines(first: usize, count: usize) -> Vec<String> {
    (first..first + count)
        .map(|n| format!("first{n},last{n},person{n}@example.com,{}", 20 + n))
        .collect()
}

pub fn write_lines(dir: &Path, file_name: &str, lines: &[String]) {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(dir.join(file_name), content).unwrap();
}
