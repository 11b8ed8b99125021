//! `grid mnemonic` — label/number conversion.

use crate::ui;
use grid_wire::{num_to_string, string_to_num};

/// Number parsed from `0x` hex or decimal, if `value` looks like one.
fn parse_number(value: &str) -> Option<Result<u64, std::num::ParseIntError>> {
    if let Some(digits) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        return Some(u64::from_str_radix(digits, 16));
    }
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return Some(value.parse());
    }
    None
}

pub fn cmd_mnemonic(value: &str) {
    match parse_number(value) {
        Some(Ok(n)) => {
            ui::kv("Number", &format!("0x{n:x} ({n})"));
            ui::kv("Label", &format!("{:?}", num_to_string(n)));
        }
        Some(Err(e)) => {
            ui::error(&format!("Invalid number '{value}': {e}"));
            std::process::exit(2);
        }
        None => {
            let n = string_to_num(value);
            ui::kv("Label", &format!("{value:?}"));
            ui::kv("Number", &format!("0x{n:x} ({n})"));
            if value.len() > 8 {
                ui::hint("Only the last 8 bytes of a label fit in the number");
            }
        }
    }
}
