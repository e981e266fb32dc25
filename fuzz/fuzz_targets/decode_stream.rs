#![no_main]

use libfuzzer_sys::fuzz_target;
use marckv::{DecoderConfig, Iso2709Reader, Iso2709Writer, KeyValueAdapter, KeyValueLogger};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // decoding arbitrary bytes must never panic, whatever the error policy
    let config = DecoderConfig::default().with_silent_errors(true);
    let mut logger = KeyValueLogger::default();
    {
        let mut adapter = KeyValueAdapter::new().add_listener(&mut logger);
        let mut reader = Iso2709Reader::new(Cursor::new(data)).with_config(config.clone());
        let _ = reader.parse(&mut adapter);
    }

    let mut reader = Iso2709Reader::new(Cursor::new(data)).with_config(config);
    let mut writer = Iso2709Writer::new(Vec::new());
    let _ = reader.parse(&mut writer);
    let _ = writer.finish();
});
