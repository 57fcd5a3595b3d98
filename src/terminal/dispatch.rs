// Slash command parsing and dispatch

use crate::terminal::sender::Replier;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Customizes a command's arguments for one sender
pub type ArgsBuilder = Arc<dyn Fn(Command, &str, &Replier) -> Command + Send + Sync>;

/// Runs a command with its parsed arguments, the sender address and a replier
pub type CommandHandler =
    Arc<dyn Fn(ArgMatches, String, Replier) -> BoxFuture<'static, Result<()>> + Send + Sync>;

const HELP_COMMAND: &str = "help";

/// Presentation options for the command parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParserOptions {
    pub script_name: String,
    pub usage: String,
    /// Offer `-h`/`--help`
    pub help: bool,
    /// Short flag for help
    pub help_alias: String,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            script_name: String::new(),
            usage: "/<command> [options]".to_string(),
            help: true,
            help_alias: "h".to_string(),
        }
    }
}

/// A registered command
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub builder: Option<ArgsBuilder>,
    pub handler: CommandHandler,
}

impl CommandSpec {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ArgMatches, String, Replier) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            builder: None,
            handler: Arc::new(move |matches, src, replier| Box::pin(handler(matches, src, replier))),
        }
    }

    /// Attach an argument schema builder
    pub fn with_args<B>(mut self, builder: B) -> Self
    where
        B: Fn(Command, &str, &Replier) -> Command + Send + Sync + 'static,
    {
        self.builder = Some(Arc::new(builder));
        self
    }
}

/// Read-only mapping from command name to its spec
#[derive(Clone, Default)]
pub struct CommandTable {
    entries: Vec<CommandSpec>,
    index: HashMap<String, usize>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command, replacing any earlier one with the same name
    pub fn register(mut self, spec: CommandSpec) -> Self {
        if let Some(&i) = self.index.get(&spec.name) {
            self.entries[i] = spec;
        } else {
            self.index.insert(spec.name.clone(), self.entries.len());
            self.entries.push(spec);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<CommandSpec> for CommandTable {
    fn from_iter<I: IntoIterator<Item = CommandSpec>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CommandTable::new(), |table, spec| table.register(spec))
    }
}

/// Parses command lines and invokes the matching handler
pub struct CommandDispatcher {
    table: CommandTable,
    options: ParserOptions,
}

impl CommandDispatcher {
    pub fn new(table: CommandTable, options: ParserOptions) -> Self {
        Self { table, options }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Build the parser for one sender
    fn build_parser(&self, src: &str, replier: &Replier) -> Command {
        let name = if self.options.script_name.is_empty() {
            "terminal".to_string()
        } else {
            self.options.script_name.clone()
        };

        let mut root = Command::new(name)
            .no_binary_name(true)
            .override_usage(self.options.usage.clone())
            .color(ColorChoice::Never)
            .disable_help_subcommand(true)
            .disable_help_flag(true)
            .disable_version_flag(true)
            .arg_required_else_help(true);

        if self.options.help {
            let mut help = Arg::new("help")
                .long("help")
                .help("Show help")
                .action(ArgAction::Help);
            match self.options.help_alias.chars().next() {
                Some(c) if c != 'h' && self.options.help_alias.chars().count() == 1 => {
                    help = help.short(c).short_alias('h');
                }
                _ => help = help.short('h'),
            }
            root = root.arg(help);
        }

        if self.table.get(HELP_COMMAND).is_none() {
            root = root.subcommand(
                Command::new(HELP_COMMAND)
                    .about("Show available commands")
                    .bin_name(format!("/{}", HELP_COMMAND))
                    .arg(Arg::new("command").help("Command to describe")),
            );
        }

        for spec in self.table.iter() {
            let mut sub = Command::new(spec.name.clone())
                .about(spec.description.clone())
                .bin_name(format!("/{}", spec.name));
            if !self.options.help {
                sub = sub.disable_help_flag(true);
            }
            if let Some(builder) = &spec.builder {
                sub = builder(sub, src, replier);
            }
            root = root.subcommand(sub);
        }

        root
    }

    /// Parse `line` (without the leading `/`) and run the matching command.
    ///
    /// Every outcome the sender should see is sent through `replier`. Returns
    /// the root help text.
    pub async fn dispatch(&self, line: &str, src: &str, replier: &Replier) -> Result<String> {
        let mut parser = self.build_parser(src, replier);
        let help = parser.render_help().to_string();

        let tokens = match shell_words::split(line) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Error parsing command from {}: {}", src, e);
                replier.send_error(src, &format!("Error: {}", e)).await?;
                return Ok(help);
            }
        };

        let matches = match parser.try_get_matches_from_mut(tokens) {
            Ok(matches) => matches,
            Err(e) => {
                let text = e.to_string();
                match e.kind() {
                    ErrorKind::DisplayHelp
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                    | ErrorKind::DisplayVersion => {
                        replier.send_result(src, text.trim_end()).await?;
                    }
                    _ => {
                        tracing::warn!("Error parsing command from {}: {}", src, e.kind());
                        let message = text.trim_start_matches("error: ").trim_end();
                        replier.send_error(src, message).await?;
                    }
                }
                return Ok(help);
            }
        };

        let Some((name, sub_matches)) = matches.subcommand() else {
            replier.send_result(src, help.trim_end()).await?;
            return Ok(help);
        };

        let Some(spec) = self.table.get(name) else {
            // Only the built-in help command is not in the table
            let topic = sub_matches.get_one::<String>("command");
            match topic {
                Some(topic) => match parser.find_subcommand_mut(topic) {
                    Some(sub) => {
                        let text = sub.render_help().to_string();
                        replier.send_result(src, text.trim_end()).await?;
                    }
                    None => {
                        replier
                            .send_error(src, &format!("Unknown command: {}", topic))
                            .await?;
                    }
                },
                None => replier.send_result(src, help.trim_end()).await?,
            }
            return Ok(help);
        };

        tracing::info!("Executing command {} for {}", spec.name, src);
        if let Err(e) = (spec.handler)(sub_matches.clone(), src.to_string(), replier.clone()).await {
            tracing::error!("Error executing command {}: {:#}", spec.name, e);
            replier
                .send_error(src, &format!("Error executing command {}: {}", spec.name, e))
                .await?;
        }

        Ok(help)
    }
}
