//! Parses shell input lines into commands.

use triggerclock::prelude::{CountOrigin, EventSource};

/// One line of shell input.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    /// `now`
    Immediate,
    /// `at <SECONDS> <NANOS>`
    At { seconds: i64, nanoseconds: u32 },
    /// `in <MILLIS>`
    In { millis: i64 },
    /// `on <SOURCE> <next|prev|current> <COUNT> [SHIFT_NS]`
    On {
        source: EventSource,
        origin: CountOrigin,
        count: u64,
        time_shift_ns: i64,
    },
    /// `event <SOURCE>`
    Event(EventSource),
    /// `count <SOURCE>`
    Count(EventSource),
    /// `clock`
    Clock,
    /// `stop`
    Stop,
    Help,
    Exit,
    Empty,
}

pub const HELP: &[(&str, &str)] = &[
    ("now", "Schedules an immediate callback."),
    ("at <S> <NS>", "Schedules a callback at an absolute epoch time."),
    ("in <MS>", "Schedules a callback MS milliseconds from now."),
    ("on <SRC> <ORIGIN> <N> [NS]", "Schedules on an event; ORIGIN is next|prev|current."),
    ("event <SRC>", "Reports one occurrence of an event source."),
    ("count <SRC>", "Shows how often a source has occurred and what waits on it."),
    ("clock", "Prints the current absolute time."),
    ("stop", "Stops the scheduler."),
    ("exit", "Quits the shell."),
];

pub fn parse(line: &str) -> Result<ShellCommand, String> {
    let args = line.split_whitespace().collect::<Vec<_>>();
    let Some(command) = args.first() else {
        return Ok(ShellCommand::Empty);
    };

    match *command {
        "now" => Ok(ShellCommand::Immediate),
        "at" => match args[1..] {
            [seconds, nanoseconds] => Ok(ShellCommand::At {
                seconds: number(seconds, "seconds")?,
                nanoseconds: number(nanoseconds, "nanoseconds")?,
            }),
            _ => Err("Usage: at <SECONDS> <NANOS>".to_string()),
        },
        "in" => match args[1..] {
            [millis] => Ok(ShellCommand::In {
                millis: number(millis, "milliseconds")?,
            }),
            _ => Err("Usage: in <MILLIS>".to_string()),
        },
        "on" => match args[1..] {
            [source, origin, count] => on(source, origin, count, "0"),
            [source, origin, count, shift] => on(source, origin, count, shift),
            _ => Err("Usage: on <SOURCE> <next|prev|current> <COUNT> [SHIFT_NS]".to_string()),
        },
        "event" => match args[1..] {
            [source] => Ok(ShellCommand::Event(EventSource(number(source, "source")?))),
            _ => Err("Usage: event <SOURCE>".to_string()),
        },
        "count" => match args[1..] {
            [source] => Ok(ShellCommand::Count(EventSource(number(source, "source")?))),
            _ => Err("Usage: count <SOURCE>".to_string()),
        },
        "clock" => Ok(ShellCommand::Clock),
        "stop" => Ok(ShellCommand::Stop),
        "help" => Ok(ShellCommand::Help),
        "exit" | "quit" => Ok(ShellCommand::Exit),
        _ => Err(format!("Unknown command: '{}'. Type 'help'.", line.trim())),
    }
}

fn on(source: &str, origin: &str, count: &str, shift: &str) -> Result<ShellCommand, String> {
    let origin = match origin {
        "next" => CountOrigin::Next,
        "prev" | "previous" => CountOrigin::Previous,
        "current" | "cur" => CountOrigin::Current,
        other => return Err(format!("Error: '{}' is not one of next, prev, current.", other)),
    };
    Ok(ShellCommand::On {
        source: EventSource(number(source, "source")?),
        origin,
        count: number(count, "count")?,
        time_shift_ns: number(shift, "time shift")?,
    })
}

fn number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("Error: '{}' is not a valid {}.", raw, what))
}
