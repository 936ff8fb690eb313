use mc_toolkit::chip;

use crate::cli;
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::ChipArgs, out: &mut dyn Reporter) -> i32 {
    let word = match parse_word(&args.word) {
        Some(w) => w,
        None => {
            out.emit(Event::Error {
                code: exit_codes::EXIT_INVALID_INPUT,
                message: format!("not a 32-bit hex word: {}", args.word),
            });
            return exit_codes::EXIT_INVALID_INPUT;
        }
    };

    match chip::chip_info(word) {
        Ok(info) => {
            out.emit(Event::Chip(info));
            exit_codes::EXIT_OK
        }
        Err(e) => {
            out.emit(Event::Error {
                code: exit_codes::EXIT_UNKNOWN_CHIP,
                message: e.to_string(),
            });
            exit_codes::EXIT_UNKNOWN_CHIP
        }
    }
}

fn parse_word(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}
