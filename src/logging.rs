use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

/// Set up the global logger to write level + message lines to stderr.
///
/// At `Debug` or more verbose levels the source module and line are included.
pub fn init_logging(level: log::LevelFilter) {
    let pattern = if level >= log::LevelFilter::Debug {
        "{h({l:<5})} {m} [{M}:{L}]{n}"
    } else {
        "{h({l:<5})} {m}{n}"
    };

    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .target(Target::Stderr)
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .expect("Failed to configure logger");

    log4rs::init_config(config).expect("Failed to initialize logger");
}
