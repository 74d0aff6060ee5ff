use std::{env, fs, process::ExitCode};

use weft::{Dataset, Engine, StdoutSink};

const USAGE: &str = "usage: weft <template> [data-file] [--dump]";

fn main() -> ExitCode {
    let mut template_path = None;
    let mut data_path = None;
    let mut dump = false;
    for arg in env::args().skip(1) {
        if arg == "--dump" {
            dump = true;
        } else if template_path.is_none() {
            template_path = Some(arg);
        } else if data_path.is_none() {
            data_path = Some(arg);
        } else {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    }
    let Some(template_path) = template_path else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let mut data = Dataset::new();
    if let Some(data_path) = &data_path {
        let text = match fs::read_to_string(data_path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("error: unable to read {data_path}: {err}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = data.parse_text(&text) {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    }

    let mut engine = Engine::new(&data);
    if let Err(err) = engine.parse_file(&data, &template_path) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let mut sink = StdoutSink;
    let result = if dump {
        engine.dump(&mut sink)
    } else {
        engine.render(&mut data, &mut sink)
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
