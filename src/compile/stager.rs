use tracing::Level;

use super::{CompiledObject, Session};
use crate::{
    demos::{self, Demo},
    dispatch::{CallSite, Receiver},
    errors::CompileResult,
    helper::interner::Internable,
};

#[derive(Debug)]
pub struct CFlags {
    pub arg_parsing_failed: bool,
    pub dump_layout: bool,
    pub dump_tables: bool,
    pub thread_count: usize,
    pub log_level: Level,
    pub demos: Vec<String>,
}

impl Default for CFlags {
    fn default() -> Self {
        Self {
            arg_parsing_failed: false,
            dump_layout: false,
            dump_tables: false,
            thread_count: 1,
            log_level: Level::WARN,
            demos: Vec::new(),
        }
    }
}

pub fn parse_args(args: &[&str]) -> CFlags {
    enum State {
        ExpectDemo,
        ExpectThreadCount,
    }

    let mut state = State::ExpectDemo;
    let mut cflags = CFlags::default();

    for s in args.iter() {
        match *s {
            "-Cthreads" => state = State::ExpectThreadCount,
            "-Dlayout" => cflags.dump_layout = true,
            "-Dtables" => cflags.dump_tables = true,
            "-v" => {
                cflags.log_level = if cflags.log_level == Level::WARN {
                    Level::INFO
                } else if cflags.log_level == Level::INFO {
                    Level::DEBUG
                } else {
                    Level::TRACE
                }
            }
            "-q" => cflags.log_level = Level::ERROR,
            other => match state {
                State::ExpectDemo => cflags.demos.push(other.to_owned()),
                State::ExpectThreadCount => {
                    match other.parse::<usize>() {
                        Ok(count) if count > 0 => cflags.thread_count = count,
                        _ => {
                            eprintln!("Expected a thread count, instead got '{}'", other);
                            cflags.arg_parsing_failed = true;
                        }
                    }
                    state = State::ExpectDemo;
                }
            },
        }
    }

    if let State::ExpectThreadCount = state {
        eprintln!("-Cthreads needs a count");
        cflags.arg_parsing_failed = true;
    }

    cflags
}

/// Entry point of the binary. Returns the process exit code.
pub fn launch(args: &[&str]) -> i32 {
    let cflags = parse_args(args);
    if cflags.arg_parsing_failed {
        return 2;
    }

    // a second launch in the same process keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_max_level(cflags.log_level)
        .with_target(false)
        .try_init();

    tracing::debug!("flags: {:?}", cflags);

    let pool = match rayon::ThreadPoolBuilder::new().num_threads(cflags.thread_count).build() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("couldn't build thread pool: {e}");
            return 1;
        }
    };

    pool.install(|| run(&cflags))
}

fn run(cflags: &CFlags) -> i32 {
    let catalog = demos::catalog();

    let selected: Vec<&Demo> = if cflags.demos.is_empty() {
        catalog.iter().collect()
    } else {
        let mut v = Vec::new();
        for name in cflags.demos.iter() {
            match catalog.iter().find(|d| d.name == name.as_str()) {
                Some(d) => v.push(d),
                None => {
                    eprintln!(
                        "Unknown demo '{}', known demos are: {}",
                        name,
                        catalog.iter().map(|d| d.name).collect::<Vec<_>>().join(", ")
                    );
                    return 2;
                }
            }
        }
        v
    };

    let session = Session::new();
    let roots: Vec<_> = selected.iter().map(|d| (d.build)()).collect();
    let results = session.compile_all(&roots);

    let mut failures = 0;
    for (demo, result) in selected.iter().zip(results) {
        let outcome = result.and_then(|obj| {
            if cflags.dump_layout {
                println!("{}", obj.descriptor);
            }
            if cflags.dump_tables {
                println!("{}", obj.table);
            }
            exercise(&session, demo, &obj)
        });

        if let Err(e) = outcome {
            e.report();
            failures += 1;
        }
    }

    tracing::info!(
        "layout cache: {} shapes, {} hits, {} misses",
        session.flattener().cached(),
        session.flattener().hits(),
        session.flattener().misses()
    );

    if failures > 0 {
        1
    } else {
        0
    }
}

/// Runs the calls a demo lists against one instance, planning each one as a
/// monomorphized site.
fn exercise(session: &Session, demo: &Demo, obj: &CompiledObject) -> CompileResult<()> {
    let mut instance = if obj.table.elision_eligible {
        obj.elided()?
    } else {
        obj.boxed()
    };

    for (method, args) in demo.calls.iter() {
        let site = CallSite {
            receiver: Receiver::Monomorphized(obj.id()),
            method: method.intern(),
        };
        let got = session.invoke(&site, &mut instance, args)?;
        println!(
            "{}.{}({}) = {}",
            obj.label,
            method,
            args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "),
            got
        );
    }

    for iface in demo.satisfies.iter() {
        session.check(obj, iface)?;
        println!("{} satisfies {}", obj.label, iface.name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_parsed_in_order() {
        let f = parse_args(&["-Dlayout", "-Cthreads", "4", "duck", "-v", "-v", "counter"]);
        assert!(f.dump_layout);
        assert!(!f.dump_tables);
        assert_eq!(f.thread_count, 4);
        assert_eq!(f.log_level, Level::DEBUG);
        assert_eq!(f.demos, vec!["duck".to_owned(), "counter".to_owned()]);
        assert!(!f.arg_parsing_failed);
    }

    #[test]
    fn bad_thread_counts_fail() {
        assert!(parse_args(&["-Cthreads", "many"]).arg_parsing_failed);
        assert!(parse_args(&["-Cthreads"]).arg_parsing_failed);
    }

    #[test]
    fn launching_every_demo_succeeds() {
        assert_eq!(launch(&["-q", "-Cthreads", "2"]), 0);
    }

    #[test]
    fn unknown_demos_are_rejected() {
        assert_eq!(launch(&["-q", "platypus"]), 2);
    }
}
