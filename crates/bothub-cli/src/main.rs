use std::{
    io::{self, Write},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, anyhow};
use bothub_cli::{
    CliError, Result,
    api::{ApiClient, UreqTransport},
    config::UserConfig,
    console::{self, CachedStorage, ConsoleChannel, HttpStorageClient, TestConsole},
    deploy::{DeployOptions, DeployProgress, DeployState, Deployer},
    render,
    settings::{Settings, load_settings, resolve_config_dir},
    version_check::{TtlCache, VersionChecker},
    workspace::{CHANNELS, Workspace, channel_fields, format_log_entry},
};
use camino::Utf8PathBuf;
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use dialoguer::{Input, Password, Select};
use semver::Version;
use serde_json::{Map, Value};

#[derive(Parser, Debug)]
#[command(
    name = "bothub",
    version,
    about = "Configure, init and deploy bot code to the BotHub.Studio service"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Setup credentials
    Configure,
    /// Introduction guide
    Introduction,
    /// Initialize a project in the current directory
    Init,
    /// Create a new project in its own directory
    New,
    /// Deploy the project
    Deploy {
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Clone an existing project
    Clone { project_name: String },
    /// List projects
    Ls {
        #[arg(short, long)]
        long: bool,
    },
    /// Delete a project
    Rm { name: String },
    /// Setup channels of the current project
    Channel {
        #[command(subcommand)]
        command: ChannelCommand,
    },
    /// Manage project properties
    Property {
        #[command(subcommand)]
        command: PropertyCommand,
    },
    /// Manage project NLU integrations
    Nlu {
        #[command(subcommand)]
        command: NluCommand,
    },
    /// Run a test chat session
    Test,
    /// Show error logs
    Logs,
}

#[derive(Subcommand, Debug)]
enum ChannelCommand {
    /// Add a new channel to the current project
    Add {
        channel: Option<String>,
        /// Telegram api key
        #[arg(long)]
        api_key: Option<String>,
        /// Facebook app id
        #[arg(long)]
        app_id: Option<String>,
        /// Facebook app secret
        #[arg(long)]
        app_secret: Option<String>,
        /// Facebook page access token
        #[arg(long)]
        page_access_token: Option<String>,
    },
    /// List channels of the current project
    Ls {
        #[arg(short, long)]
        long: bool,
    },
    /// Remove a channel from the current project
    Rm { channel: String },
}

#[derive(Subcommand, Debug)]
enum PropertyCommand {
    /// Get property list
    Ls,
    /// Reload property list from the server
    Reload,
    /// Get value of a property
    Get { key: String },
    /// Set value of a property
    Set {
        key: String,
        value: String,
        /// Reject values that are not valid JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a property
    Rm { key: String },
}

#[derive(Subcommand, Debug)]
enum NluCommand {
    /// List NLU integrations
    Ls {
        #[arg(short, long)]
        long: bool,
    },
    /// Add a NLU integration
    Add {
        nlu: String,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Show credentials of a NLU integration
    Get { nlu: String },
    /// Delete a NLU integration
    Rm { nlu: String },
}

struct App {
    config_dir: Utf8PathBuf,
    settings: Settings,
    workspace: Workspace,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let mut app = match App::load() {
        Ok(app) => app,
        Err(err) => {
            print_error(&format!("{err:#}"));
            return ExitCode::FAILURE;
        }
    };
    app.print_update_notice();

    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };
    match app.dispatch(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&format!("{}: {err}", err.kind()));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn print_error(message: &str) {
    println!("{}", message.red());
}

fn print_success(message: &str) {
    println!("{}", message.green());
}

fn print_introduction(start: usize) {
    for (command, description) in render::introduction(start) {
        println!("{}", command.green());
        println!("{description}");
    }
}

fn prompt_text(prompt: &str) -> Result<String> {
    Input::<String>::new()
        .with_prompt(prompt)
        .interact_text()
        .map_err(|_| CliError::Cancelled)
}

impl App {
    fn load() -> anyhow::Result<Self> {
        let config_dir = resolve_config_dir().context("resolving config directory")?;
        let settings = load_settings(&config_dir).context("loading settings")?;
        let cwd = std::env::current_dir().context("reading working directory")?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|path| anyhow!("working directory is not UTF-8: {}", path.display()))?;
        let user_config = UserConfig::open(&config_dir).context("loading user config")?;

        let api = ApiClient::new(&settings.api_base_url, Arc::new(UreqTransport::new()))
            .with_token_expiry_check(settings.verify_token_expiry);
        let workspace = Workspace::new(api, user_config, cwd);
        Ok(Self {
            config_dir,
            settings,
            workspace,
        })
    }

    fn print_update_notice(&self) {
        if !self.settings.check_updates {
            return;
        }
        let Ok(current) = Version::parse(env!("CARGO_PKG_VERSION")) else {
            return;
        };
        let transport = UreqTransport::with_timeout(self.settings.update_timeout());
        let checker = VersionChecker::new(
            Arc::new(transport),
            &self.settings.update_index_url,
            TtlCache::in_dir(&self.config_dir),
            current,
        );
        if let Some(notice) = checker.notice() {
            println!("{}", notice.yellow());
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Configure => self.configure(),
            Command::Introduction => {
                print_introduction(0);
                Ok(())
            }
            Command::Init => {
                self.create_project(false)?;
                print_introduction(2);
                Ok(())
            }
            Command::New => {
                self.create_project(true)?;
                print_introduction(2);
                Ok(())
            }
            Command::Deploy { max_retries } => self.deploy(max_retries),
            Command::Clone { project_name } => {
                self.workspace.clone(&project_name, None)?;
                print_success(&format!("Project {project_name} is cloned."));
                Ok(())
            }
            Command::Ls { long } => {
                let rows = self.workspace.ls(long)?;
                let header: &[&str] = if long {
                    &["Project", "Status", "Created"]
                } else {
                    &["Project"]
                };
                println!("{}", render::table(header, &rows));
                println!("You have {} projects", rows.len());
                Ok(())
            }
            Command::Rm { name } => {
                self.workspace.rm(&name)?;
                println!("Deleted a project: {name}");
                Ok(())
            }
            Command::Channel { command } => self.channel(command),
            Command::Property { command } => self.property(command),
            Command::Nlu { command } => self.nlu(command),
            Command::Test => {
                self.test()?;
                print_introduction(3);
                Ok(())
            }
            Command::Logs => {
                for entry in self.workspace.logs()? {
                    println!("{}", format_log_entry(&entry));
                }
                Ok(())
            }
        }
    }

    fn configure(&mut self) -> Result<()> {
        println!("Please enter your BotHub.Studio login credentials:");
        let username = prompt_text("username")?;
        let password = Password::new()
            .with_prompt("password")
            .interact()
            .map_err(|_| CliError::Cancelled)?;
        print_success("Connecting to server...");
        self.workspace.authenticate(username.trim(), &password)?;
        print_success(&format!("Identified. Welcome {}.", username.trim()));
        print_introduction(1);
        Ok(())
    }

    fn create_project(&self, create_dir: bool) -> Result<()> {
        println!("Initialize a new project.");
        let name = loop {
            let name = match prompt_text("Project name") {
                Ok(name) => name,
                Err(CliError::Cancelled) => {
                    print_error("Project creation has cancelled.");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            let name = name.trim().to_owned();
            if !name.is_empty() {
                break name;
            }
        };

        let workspace = if create_dir {
            self.workspace.in_dir(self.workspace.project_dir().join(&name))
        } else {
            self.workspace.in_dir(self.workspace.project_dir())
        };
        let already_initialized = workspace.project_config_exists();

        print_success("Creating project...");
        workspace.init(&name, "")?;
        if already_initialized {
            println!("Skip to initialize a project template.");
        } else {
            println!("Initialize project template.");
            workspace.init_code()?;
            println!("Download project template.");
            workspace.clone(&name, Some(workspace.project_dir()))?;
        }
        print_success("Project has created.");
        Ok(())
    }

    fn deploy(&self, max_retries: Option<u32>) -> Result<()> {
        let options = DeployOptions {
            interval: self.settings.poll_interval(),
            max_retries: max_retries.unwrap_or(self.settings.max_retries),
        };
        let mut deployer = Deployer::new(
            self.workspace.api(),
            self.workspace.project_dir(),
            options,
        );
        let result = deployer.run(|progress| {
            match progress {
                DeployProgress::State(DeployState::Packaging) => println!("Make a dist package."),
                DeployProgress::State(DeployState::Uploading) => {
                    println!("Upload the dist package.")
                }
                DeployProgress::State(DeployState::Polling) => print!("Check project status"),
                DeployProgress::State(DeployState::Succeeded | DeployState::Failed) => println!(),
                DeployProgress::State(DeployState::Init) => {}
                DeployProgress::Poll { .. } => print!("."),
                DeployProgress::Restarting => print!(" restarting "),
            }
            let _ = io::stdout().flush();
        });
        result?;
        print_success("Project is deployed.");
        Ok(())
    }

    fn channel(&self, command: ChannelCommand) -> Result<()> {
        match command {
            ChannelCommand::Add {
                channel,
                api_key,
                app_id,
                app_secret,
                page_access_token,
            } => {
                let channel = match channel {
                    Some(channel) if CHANNELS.contains(&channel.as_str()) => channel,
                    _ => {
                        let picked = Select::new()
                            .with_prompt("Channel name")
                            .items(&CHANNELS)
                            .default(0)
                            .interact()
                            .map_err(|_| CliError::Cancelled)?;
                        CHANNELS[picked].to_owned()
                    }
                };
                let given = [
                    ("api_key", api_key),
                    ("app_id", app_id),
                    ("app_secret", app_secret),
                    ("page_access_token", page_access_token),
                ];
                let credentials = ask_channel_keys(&channel, &given)?;
                self.workspace.add_channel(&channel, &credentials)?;
                println!("Added a channel {channel}");
                Ok(())
            }
            ChannelCommand::Ls { long } => {
                let rows = self.workspace.ls_channel(long)?;
                let header: &[&str] = if long {
                    &["Channel", "Credentials"]
                } else {
                    &["Channel"]
                };
                println!("{}", render::table(header, &rows));
                Ok(())
            }
            ChannelCommand::Rm { channel } => {
                self.workspace.rm_channel(&channel)?;
                println!("Deleted a channel: {channel}");
                Ok(())
            }
        }
    }

    fn property(&self, command: PropertyCommand) -> Result<()> {
        match command {
            PropertyCommand::Ls => {
                let properties = self.workspace.ls_properties()?;
                let rows = render::property_rows(&properties);
                println!("{}", render::table(&["Name", "Value"], &rows));
                Ok(())
            }
            PropertyCommand::Reload => {
                let properties = self.workspace.reload_properties()?;
                let rows = render::property_rows(&properties);
                println!("{}", render::table(&["Name", "Value"], &rows));
                Ok(())
            }
            PropertyCommand::Get { key } => {
                let value = self.workspace.get_property(&key)?;
                println!("{}", render::property_value(&key, &value));
                Ok(())
            }
            PropertyCommand::Set { key, value, json } => {
                self.workspace.set_property(&key, &value, json)?;
                println!("Set a property: {key}");
                Ok(())
            }
            PropertyCommand::Rm { key } => {
                self.workspace.rm_property(&key)?;
                println!("Deleted a property: {key}");
                Ok(())
            }
        }
    }

    fn nlu(&self, command: NluCommand) -> Result<()> {
        match command {
            NluCommand::Ls { long } => {
                let rows = self.workspace.ls_nlus(long)?;
                let header: &[&str] = if long {
                    &["NLU", "Credentials"]
                } else {
                    &["NLU"]
                };
                println!("{}", render::table(header, &rows));
                Ok(())
            }
            NluCommand::Add { nlu, api_key } => {
                let mut credentials = Map::new();
                if let Some(api_key) = api_key.filter(|key| !key.is_empty()) {
                    credentials.insert("api_key".into(), Value::String(api_key));
                }
                self.workspace.add_nlu(&nlu, &credentials)?;
                println!("Added a NLU: {nlu}");
                Ok(())
            }
            NluCommand::Get { nlu } => {
                let credentials = self.workspace.get_nlu(&nlu)?;
                println!("{nlu}: {credentials}");
                Ok(())
            }
            NluCommand::Rm { nlu } => {
                self.workspace.rm_nlu(&nlu)?;
                println!("Deleted a NLU: {nlu}");
                Ok(())
            }
        }
    }

    fn test(&self) -> Result<()> {
        let project = self.workspace.load_project()?;
        let project_id = project.project_id()?;
        let api = self.workspace.api();
        let nlus = api.get_project_nlus(project_id)?;
        let handler = console::load_handler(
            self.workspace.project_dir().as_std_path(),
            project.metadata().entry_point.as_deref(),
        )?;
        let mut storage = CachedStorage::new(HttpStorageClient::new(api.clone(), project_id));
        storage.load_project_data()?;

        let mut session = TestConsole::new(
            handler,
            storage,
            ConsoleChannel::new(io::stdout()),
            project_id,
            nlus,
        );
        println!("Type {} for console commands.", "/help".yellow());
        session.run_interactive()
    }
}

/// Use the value given on the command line when it is valid, otherwise
/// prompt until it is.
fn ask_channel_keys(
    channel: &str,
    given: &[(&str, Option<String>)],
) -> Result<Map<String, Value>> {
    let mut credentials = Map::new();
    for field in channel_fields(channel)? {
        let mut value = given
            .iter()
            .find(|(name, _)| *name == field.name)
            .and_then(|(_, value)| value.clone())
            .unwrap_or_default();
        let mut retry = false;
        loop {
            if let Some(valid) = field.validate(&value) {
                credentials.insert(field.name.into(), Value::String(valid.to_owned()));
                print_success(&format!("{} is saved", field.label));
                break;
            }
            if !value.is_empty() {
                print_error(&format!("{} is invalid", field.label));
                retry = true;
            }
            value = prompt_text(&field.prompt(retry))?;
        }
    }
    Ok(credentials)
}
