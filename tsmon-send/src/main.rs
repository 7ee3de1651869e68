use std::{
    env, fs,
    process::ExitCode,
    sync::{Arc, OnceLock},
};

use getopts::{Matches, Options};
use tracing::{error, info};
use tsmon::{config::Config, Error, Field, FieldValue, FlushMode, Metric, MetricBuilder, MetricValue, State};

static STATE: OnceLock<Arc<State>> = OnceLock::new();

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {program} --name NAME --type TYPE --value VALUE [options]");
    print!("{}", opts.usage(&brief));
}

fn fqdn() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|path| fs::read_to_string(path).ok())
        .or_else(|| env::var("HOSTNAME").ok())
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

fn parse_field(spec: &str) -> Option<(String, FieldValue)> {
    let (name, value) = spec.split_once('=')?;
    let value = match value {
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        other => other.parse::<i64>().map(FieldValue::Int).unwrap_or_else(|_| FieldValue::Str(other.to_string())),
    };
    Some((name.to_string(), value))
}

fn field_of(name: &str, value: &FieldValue) -> Field {
    match value {
        FieldValue::Str(_) => Field::string(name),
        FieldValue::Int(_) => Field::int(name),
        FieldValue::Bool(_) => Field::bool(name),
    }
}

fn register(state: &Arc<State>, matches: &Matches, fields: &[(String, FieldValue)]) -> Result<Metric, String> {
    let name = matches.opt_str("name").ok_or("--name is required")?;
    let description = matches.opt_str("description").unwrap_or_else(|| name.clone());
    let builder =
        MetricBuilder::new(name, description).with_fields(fields.iter().map(|(name, value)| field_of(name, value)));

    let kind = matches.opt_str("type").ok_or("--type is required")?;
    let metric = match kind.as_str() {
        "counter" => builder.counter(state).map(|m| m.metric().clone()),
        "gauge" => builder.gauge(state).map(|m| m.metric().clone()),
        "cumulative" => builder.cumulative(state).map(|m| m.metric().clone()),
        "float" => builder.float(state).map(|m| m.metric().clone()),
        "string" => builder.string(state).map(|m| m.metric().clone()),
        "bool" => builder.boolean(state).map(|m| m.metric().clone()),
        other => return Err(format!("unknown metric type '{other}'")),
    };
    metric.map_err(|e| e.to_string())
}

fn parse_value(kind: &str, raw: &str) -> Result<MetricValue, String> {
    let invalid = || format!("invalid {kind} value '{raw}'");
    match kind {
        "counter" | "gauge" => raw.parse::<i64>().map(MetricValue::Int).map_err(|_| invalid()),
        "cumulative" | "float" => raw.parse::<f64>().map(MetricValue::Float).map_err(|_| invalid()),
        "bool" => raw.parse::<bool>().map(MetricValue::Bool).map_err(|_| invalid()),
        _ => Ok(MetricValue::String(raw.to_string())),
    }
}

fn run(matches: &Matches) -> Result<(), String> {
    let config = Config::from_matches(matches, &fqdn()).map_err(|e| e.to_string())?;
    let state = config.state_builder().map_err(|e| e.to_string())?.build().map_err(|e| e.to_string())?;
    let state = STATE.get_or_init(|| state);

    let fields = matches
        .opt_strs("field")
        .iter()
        .map(|spec| parse_field(spec).ok_or_else(|| format!("invalid field '{spec}', expected NAME=VALUE")))
        .collect::<Result<Vec<_>, _>>()?;

    let metric = register(state, matches, &fields)?;
    let kind = matches.opt_str("type").unwrap_or_default();
    let raw = matches.opt_str("value").ok_or("--value is required")?;
    let value = parse_value(&kind, &raw)?;

    metric.set(value, fields).map_err(|e| e.to_string())?;
    info!(metric = metric.name(), value = %raw, "Metric value set.");

    finish(state)
}

/// Sends the values set so far exactly once and stops background flushing.
///
/// In auto mode the flush thread sends them on close, and in all mode the mutation already did.
fn finish(state: &State) -> Result<(), String> {
    let flushed = match state.flush_mode() {
        FlushMode::Manual => match state.flush() {
            Err(Error::NoConfiguredMonitor) => Err("no monitor configured".to_string()),
            other => other.map_err(|e| e.to_string()),
        },
        FlushMode::Auto | FlushMode::All => Ok(()),
    };
    state.close();
    flushed
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "tsmon-send".to_string());

    let mut opts = Options::new();
    opts.optopt("n", "name", "name of the metric", "NAME");
    opts.optopt("d", "description", "description of the metric (default: its name)", "TEXT");
    opts.optopt("t", "type", "type of the metric: counter, gauge, cumulative, float, string or bool", "TYPE");
    opts.optopt("v", "value", "value to set", "VALUE");
    opts.optmulti("f", "field", "field of the metric, may be repeated", "NAME=VALUE");
    opts.optflag("h", "help", "print this help menu");
    Config::add_options(&mut opts);

    let matches = match opts.parse(args.iter().skip(1)) {
        Ok(matches) => matches,
        Err(e) => {
            eprintln!("{e}");
            print_usage(&program, &opts);
            return ExitCode::FAILURE;
        }
    };

    if matches.opt_present("help") {
        print_usage(&program, &opts);
        return ExitCode::SUCCESS;
    }

    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Failed to send metric.");
            ExitCode::FAILURE
        }
    }
}
