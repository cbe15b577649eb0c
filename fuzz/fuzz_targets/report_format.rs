#![no_main]

use callpath::report::format_frames;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte picks the capacity, the rest is newline-separated frame text
    let Some((&capacity, rest)) = data.split_first() else {
        return;
    };
    let Ok(input) = std::str::from_utf8(rest) else {
        return;
    };

    let frames: Vec<String> = input.split('\n').map(str::to_string).collect();
    let text = format_frames(&frames, capacity as usize);

    assert!(text.len() <= capacity as usize);
});
