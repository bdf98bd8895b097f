use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::rc::Rc;

// Use the library crate's modules
use fieldbridge::{App, BridgeConfig, BridgeError, GuestModule, MemorySnapshot, Param, RecordingContext};

fn bridge_err(e: BridgeError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn usage(program: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "Usage: {} [--frames <n>] [--set <name=value>]... [--config <file.json>] [--trace] [--dump-memory <file>]",
            program
        ),
    )
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut frames = 60u32;
    let mut params: Vec<Param> = Vec::new();
    let mut config_path = String::new();
    let mut trace = false;
    let mut dump_path = String::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" => {
                i += 1;
                frames = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| usage(&args[0]))?;
            }
            "--set" => {
                i += 1;
                let pair = args.get(i).ok_or_else(|| usage(&args[0]))?;
                params.push(pair.parse().map_err(bridge_err)?);
            }
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned().ok_or_else(|| usage(&args[0]))?;
            }
            "--trace" => {
                trace = true;
            }
            "--dump-memory" => {
                i += 1;
                dump_path = args.get(i).cloned().ok_or_else(|| usage(&args[0]))?;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                return Err(usage(&args[0]));
            }
        }
        i += 1;
    }

    let mut config = if config_path.is_empty() {
        BridgeConfig::default()
    } else {
        BridgeConfig::load(&config_path).map_err(bridge_err)?
    };
    config.trace_calls |= trace;

    println!("fieldbridge headless run");
    println!("Viewport: {}x{}", config.viewport[0], config.viewport[1]);
    println!("Frames: {}", frames);

    let extensions: Vec<&str> = config.extensions.iter().map(String::as_str).collect();
    let ctx = Rc::new(RecordingContext::new(config.viewport[0], config.viewport[1]).with_extensions(&extensions));
    let instance = GuestModule::instantiate(config.clone());
    let mut app = App::new(&instance, ctx.clone()).map_err(bridge_err)?;

    for param in params {
        let restarted = app.set_parameter(param.clone()).map_err(bridge_err)?;
        println!("Set {:?}{}", param, if restarted { " (restarted)" } else { "" });
    }

    // Only the draw count outlives a frame
    ctx.take_calls();
    let mut draws = 0;
    // 60 fps timestamps in ms
    for frame in 0..frames {
        app.tick(frame as f64 * 1000.0 / 60.0).map_err(bridge_err)?;
        draws += ctx.draw_count();
        ctx.take_calls();
    }

    println!("-------------------------------------");
    print!("{}", app.info().map_err(bridge_err)?);
    println!("-------------------------------------");
    println!("Draw calls: {}", draws);

    let stats = instance.borrow().stats();
    println!(
        "Handles: {} live / {} slots, allocations: {} ({} bytes), memory: {} pages",
        stats.live_handles, stats.handle_capacity, stats.live_allocations, stats.live_bytes, stats.memory_pages
    );

    if !dump_path.is_empty() {
        let snapshot = MemorySnapshot::capture(instance.borrow().store());
        let bytes = snapshot.to_bytes().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let mut f = File::create(&dump_path)?;
        f.write_all(&bytes)?;
        println!(
            "Memory dumped to {} ({} dirty bytes, {} compressed)",
            dump_path,
            snapshot.dirty_bytes(),
            bytes.len()
        );
    }

    app.release().map_err(bridge_err)?;
    Ok(())
}
