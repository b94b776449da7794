//! Command-line front end for a signed-withdrawal vault.
//!
//! Every invocation loads the configuration, builds the vault over the
//! configured storage backend and runs one command. With the file backend
//! balances and spent nonces persist between invocations.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use vault_config::Config;
use vault_types::{Address, AuthorizationRequest, AuthorizationSignature, B256, U256};

mod factory_registry;

/// Command-line arguments for the vault binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "VAULT_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Add funds to the vault.
	Deposit {
		#[arg(long)]
		amount: U256,
	},
	/// Execute a withdrawal signed by the authorizer.
	Withdraw {
		#[command(flatten)]
		request: RequestArgs,
		/// 65-byte r || s || v signature, hex encoded
		#[arg(long)]
		signature: AuthorizationSignature,
	},
	/// Show the vault balance, or another account's.
	Balance {
		#[arg(long)]
		account: Option<Address>,
	},
	/// Print the EIP-712 digest the authorizer has to sign.
	Digest {
		#[command(flatten)]
		request: RequestArgs,
	},
	/// Sign a withdrawal with the configured account.
	Sign {
		#[command(flatten)]
		request: RequestArgs,
	},
	/// Drop spent nonces whose retention window has passed.
	Prune,
}

/// Fields of a withdrawal authorization. The vault is taken from configuration.
#[derive(ClapArgs, Debug, Clone)]
struct RequestArgs {
	#[arg(long)]
	recipient: Address,
	#[arg(long)]
	amount: U256,
	/// 32-byte nonce, hex encoded
	#[arg(long)]
	nonce: B256,
	/// Unix timestamp after which the authorization is invalid
	#[arg(long)]
	deadline: u64,
}

impl RequestArgs {
	fn into_request(self, vault: Address) -> AuthorizationRequest {
		AuthorizationRequest {
			vault,
			recipient: self.recipient,
			amount: self.amount,
			nonce: self.nonce,
			deadline: self.deadline,
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.with_writer(std::io::stderr)
		.init();

	let config = Config::from_file(&args.config).await?;
	tracing::info!(
		config = %args.config.display(),
		vault = %config.vault.address,
		"Loaded configuration"
	);

	run(config, args.command).await
}

async fn run(config: Config, command: Command) -> Result<(), Box<dyn std::error::Error>> {
	let (builder, factories) = factory_registry::builder_from_config(config)?;
	let vault = builder.build(&factories)?;

	match command {
		Command::Deposit { amount } => {
			let balance = vault.deposit(amount).await?;
			println!("{}", balance);
		},
		Command::Withdraw { request, signature } => {
			let remaining = vault
				.withdraw(
					request.recipient,
					request.amount,
					request.nonce,
					request.deadline,
					&signature,
				)
				.await?;
			println!("{}", remaining);
		},
		Command::Balance { account } => {
			let balance = match account {
				Some(account) => vault.balance_of(&account).await?,
				None => vault.balance().await?,
			};
			println!("{}", balance);
		},
		Command::Digest { request } => {
			let request = request.into_request(vault.address());
			println!("domain_separator: {}", vault.validator().domain_separator());
			println!("digest: {}", vault.validator().digest(&request));
		},
		Command::Sign { request } => {
			let request = request.into_request(vault.address());
			let account = builder.build_account(&factories).await?;
			let signature = account.sign(&vault.validator().digest(&request)).await?;
			println!("{}", signature);
		},
		Command::Prune => {
			let removed = vault.validator().prune_spent_nonces().await?;
			println!("{}", removed);
		},
	}

	Ok(())
}
