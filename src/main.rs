use clap::Parser;
use jexl_engine::{Engine, MapContext, Options, Permissions, Value};
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WELCOME_MESSAGE: &str = "JEXL expression engine";
const WELCOME_SUBTITLE: &str = "Type an expression or statement and press Enter.";
const WELCOME_FOOTER: &str = "Use :quit to exit, :clear to clear the screen.";

/// Embeddable expression-and-script language engine
#[derive(Parser, Debug)]
#[command(name = "jexl")]
#[command(version = VERSION)]
#[command(about = "A JEXL-flavored expression and scripting language engine")]
#[command(long_about = "Evaluates JEXL expressions and scripts against a host-supplied context")]
struct CliArgs {
    /// Script file to execute (optional - if not provided, starts REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Permissions DSL file restricting host-object access
    #[arg(long = "permissions", value_name = "FILE")]
    permissions_file: Option<PathBuf>,

    /// Disable strict mode (unknown variables/methods become null)
    #[arg(long = "lenient")]
    lenient: bool,

    /// Enable silent mode (unknown lookups become null, arithmetic errors still raise)
    #[arg(long = "silent")]
    silent: bool,

    /// Enable safe navigation at the head of every reference chain
    #[arg(long = "safe")]
    safe: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = CliArgs::parse();

    let permissions = match &args.permissions_file {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read permissions file {}: {}", path.display(), e))?;
            jexl_engine::permissions::parse(&source).map_err(|e| format!("invalid permissions: {}", e))?
        }
        None => Permissions::unrestricted(),
    };

    let options = Options {
        strict: !args.lenient,
        silent: args.silent,
        safe: args.safe,
        ..Options::default()
    };

    let engine = Engine::new(permissions, options);

    if let Some(script_path) = args.script {
        return run_script(&engine, &script_path);
    }

    run_repl(&engine)
}

fn run_script(engine: &Engine, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read script file {}: {}", path.display(), e))?;
    let script = engine
        .create_script(&contents)
        .map_err(|e| format!("parse error: {}", e))?;
    let context = MapContext::new();
    let result = script.execute(&context).map_err(|e| format!("evaluation error: {}", e))?;
    println!("{}", result);
    Ok(())
}

fn run_repl(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder().auto_add_history(true).build();
    let mut rl = Editor::<(), rustyline::history::DefaultHistory>::with_config(config)
        .map_err(|e| format!("failed to initialize REPL: {}", e))?;

    let history_file = ".jexl_history";
    let _ = rl.load_history(history_file);

    println!("{}", WELCOME_MESSAGE);
    println!("{}", WELCOME_SUBTITLE);
    println!("{}", WELCOME_FOOTER);

    let context = MapContext::new();

    loop {
        let readline = rl.readline("jexl> ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match line.trim() {
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    ":clear" => {
                        print!("\x1B[2J\x1B[H");
                        continue;
                    }
                    _ => {}
                }
                evaluate_line(engine, &context, &line);
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    Ok(())
}

fn evaluate_line(engine: &Engine, context: &MapContext, line: &str) {
    match engine.create_script(line) {
        Ok(script) => match script.execute(context) {
            Ok(Value::Null) => println!("null"),
            Ok(result) => println!("=> {}", result),
            Err(e) => eprintln!("Error: {}", e),
        },
        Err(e) => eprintln!("Parse error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_line_prints_result() {
        let engine = Engine::new(Permissions::unrestricted(), Options::default());
        let context = MapContext::new();
        // Smoke test: must not panic on a basic expression.
        evaluate_line(&engine, &context, "1 + 1;");
    }
}
