use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use v2ex_dropper::{
    batch::{BatchBuilder, PlanSummary},
    cancel::cancel_pair,
    config::{Network, OverflowPolicy, RunConfig},
    coordinator::{DistributionReport, DistributionRun, RunCoordinator},
    draw::{
        announcement, payout_announcement,
        profile::{NoProfileLookup, V2exProfileLookup, DEFAULT_V2EX_BASE},
        resolve_winners, Candidate, DrawEngine, DrawMode, DrawOutcome, DrawRequest,
        HttpDrawService, NoRemote, PostSnapshot, Seed, UnresolvedPolicy,
    },
    events::{Event, LookupStatus},
    recipient::{
        load_recipients, write_recipients, NoAliasResolver, RawRecipient, RecipientResolver,
        RecipientSource, Resolution, SnsResolver, DEFAULT_SNS_PROXY,
    },
    rpc::SolanaRpc,
    transfer::{amount_to_ui, Amount, TransferAsset},
    wallet::{KeypairWallet, UnsupportedWallet, Wallet, WalletProvider},
};

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pay the same amount of SOL or an SPL token to every recipient
    Distribute(DistributeArgs),
    /// Draw winners from the replies of a post
    Draw(DrawArgs),
    /// Generate test recipients
    GenerateRecipients(GenerateArgs),
}

#[derive(Parser)]
struct DistributeArgs {
    /// Input CSV file with `address,username[,source]` rows
    #[clap(long)]
    input_csv: PathBuf,

    /// Amount per recipient, in whole tokens (e.g. 0.001)
    #[clap(long)]
    amount: String,

    /// SPL token mint address; pays SOL when omitted
    #[clap(long)]
    mint: Option<String>,

    /// Source token account (defaults to the keypair's associated account)
    #[clap(long)]
    from: Option<String>,

    /// Keypair paying fees and signing transfers
    #[clap(long)]
    keypair: PathBuf,

    /// Wallet used to sign (keypair, phantom, solflare)
    #[clap(long, default_value = "keypair")]
    wallet_provider: WalletProvider,

    /// RPC URL
    #[clap(long, env = "SOLANA_RPC_URL", default_value = DEFAULT_RPC_URL)]
    url: String,

    /// Cluster name; guessed from the RPC URL when omitted
    #[clap(long)]
    network: Option<Network>,

    /// Rate limit (requests per second, 0 disables)
    #[clap(long, default_value = "10")]
    rate_limit: u32,

    /// Compute unit price in microlamports
    #[clap(long, default_value = "0")]
    priority_fee: u64,

    /// Delay between batches in milliseconds
    #[clap(long, default_value = "2000")]
    batch_delay_ms: u64,

    /// Give up on a wallet signature after this many seconds
    #[clap(long)]
    sign_timeout: Option<u64>,

    /// Fail instead of sending a recipient that does not fit a transaction on its own
    #[clap(long)]
    strict_size: bool,

    /// SNS proxy used to resolve .sol domains
    #[clap(long, default_value = DEFAULT_SNS_PROXY)]
    sns_proxy: String,

    /// Reject .sol domains instead of resolving them
    #[clap(long)]
    no_sns: bool,

    /// Limit number of recipients to process (useful for testing)
    #[clap(long)]
    limit: Option<usize>,

    /// Where to write the JSON run report
    #[clap(long, default_value = "distribution_report.json")]
    report: PathBuf,

    /// Perform a dry run
    #[clap(long)]
    dry_run: bool,

    /// Skip confirmation prompt
    #[clap(long)]
    yes: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Unresolved {
    Replace,
    Keep,
}

impl From<Unresolved> for UnresolvedPolicy {
    fn from(value: Unresolved) -> Self {
        match value {
            Unresolved::Replace => UnresolvedPolicy::Replace,
            Unresolved::Keep => UnresolvedPolicy::Keep,
        }
    }
}

#[derive(Parser)]
struct DrawArgs {
    /// Post snapshot JSON (title, url, author, replies)
    #[clap(long)]
    post: PathBuf,

    /// Number of winners; one per ten replies when omitted
    #[clap(long)]
    count: Option<usize>,

    /// Seed for a reproducible draw; random when omitted
    #[clap(long)]
    seed: Option<String>,

    /// Usernames that may not win
    #[clap(long)]
    exclude: Vec<String>,

    /// Let the post author win
    #[clap(long)]
    include_author: bool,

    /// Give every reply its own ticket instead of merging replies per user
    #[clap(long)]
    keep_duplicates: bool,

    /// Remote draw service; the draw runs locally when omitted or unreachable
    #[clap(long)]
    remote: Option<String>,

    /// Cluster the payout will run on, reported to the remote service
    #[clap(long, default_value = "devnet")]
    network: Network,

    /// Do not look up addresses on winner profiles
    #[clap(long)]
    skip_lookup: bool,

    /// Member API used for profile lookups
    #[clap(long, default_value = DEFAULT_V2EX_BASE)]
    v2ex_api: String,

    /// What to do with winners that have no address
    #[clap(long, value_enum, default_value = "keep")]
    unresolved: Unresolved,

    /// Write winners with an address to this CSV, ready for `distribute`
    #[clap(long)]
    output: Option<PathBuf>,
}

#[derive(Parser)]
struct GenerateArgs {
    /// Number of recipients
    #[clap(long)]
    count: usize,

    /// Output CSV file
    #[clap(long)]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Distribute(args) => distribute(args).await,
        Commands::Draw(args) => draw(args).await,
        Commands::GenerateRecipients(args) => generate_recipients(args),
    }
}

fn generate_recipients(args: GenerateArgs) -> Result<()> {
    println!("Generating {} recipients...", args.count);

    // Use timestamp to generate different recipients each time
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the Unix epoch")?
        .as_secs();

    let recipients: Vec<RawRecipient> = (0..args.count)
        .map(|i| {
            let seed = format!("recipient_{}_{}", timestamp, i);
            let hash = solana_sdk::hash::hash(seed.as_bytes());
            RawRecipient {
                id: i as u64 + 1,
                address: Pubkey::new_from_array(hash.to_bytes()).to_string(),
                username: format!("user{}", i + 1),
                source: RecipientSource::Generated,
            }
        })
        .collect();

    write_recipients(&args.output, &recipients)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Generated {} recipients in {}", args.count, args.output.display());
    Ok(())
}

async fn distribute(args: DistributeArgs) -> Result<()> {
    println!("\n🚀 Starting distribution...");

    let keypair = load_keypair(&args.keypair)?;
    let fee_payer = keypair.pubkey();
    let network = args.network.unwrap_or_else(|| Network::from_rpc_url(&args.url));
    let rpc = Arc::new(SolanaRpc::new(args.url.clone(), args.rate_limit));
    println!("🌐 RPC: {} ({})", rpc.url(), network);

    let asset = match &args.mint {
        Some(mint) => {
            let mint = Pubkey::from_str(mint).with_context(|| format!("Invalid mint address {}", mint))?;
            let from = args
                .from
                .as_deref()
                .map(Pubkey::from_str)
                .transpose()
                .context("Invalid source token account")?;
            let token = rpc
                .token_context(&mint, from, &fee_payer)
                .await
                .context("Failed to read token mint")?;
            println!("Token mint: {} (decimals: {})", token.mint, token.decimals);
            TransferAsset::Fungible(token)
        }
        None => {
            println!("Token: SOL");
            TransferAsset::Native
        }
    };
    let amount = Amount::parse(&args.amount, asset.decimals())?;

    let mut raws = load_recipients(&args.input_csv)
        .with_context(|| format!("Failed to load recipients from {}", args.input_csv.display()))?;
    if let Some(limit) = args.limit {
        if limit < raws.len() {
            println!("📊 Processing the first {} of {} recipients", limit, raws.len());
            raws.truncate(limit);
        }
    }

    let console = |event: Event| {
        if let Some(line) = render(&event) {
            println!("{}", line);
        }
    };
    let resolution: Resolution = if args.no_sns {
        RecipientResolver::new(NoAliasResolver).resolve_all(&raws, &console).await?
    } else {
        RecipientResolver::new(SnsResolver::new(args.sns_proxy.clone()))
            .resolve_all(&raws, &console)
            .await?
    };
    println!(
        "Recipients to process: {} ({} rejected)",
        resolution.accepted.len(),
        resolution.rejected.len()
    );

    let mut config = RunConfig::for_network(network);
    config.priority_fee = args.priority_fee;
    config.inter_batch_delay = Duration::from_millis(args.batch_delay_ms);
    config.sign_timeout = args.sign_timeout.map(Duration::from_secs);
    if args.strict_size {
        config.overflow = OverflowPolicy::Reject;
    }

    let batches = BatchBuilder::new(rpc.as_ref(), asset, fee_payer, amount.base_units)
        .priority_fee(config.priority_fee)
        .overflow(config.overflow)
        .build(&resolution.accepted, &console)
        .await?;
    let summary = PlanSummary::from_batches(&batches, config.priority_fee);
    print_plan(&summary, &amount, &asset);

    let balance = rpc.balance(&fee_payer).await?;
    let needed = lamports_needed(&summary, &amount, &asset);
    println!("Fee payer: {} ({:.6} SOL)", fee_payer, amount_to_ui(balance, 9));
    if balance < needed {
        println!(
            "⚠️  Warning: balance may not cover the run (need ~{:.6} SOL)",
            amount_to_ui(needed, 9)
        );
    }

    if args.dry_run {
        println!("\nDry run, nothing was sent.");
        return Ok(());
    }

    // Confirm before proceeding (unless --yes flag)
    if !args.yes {
        println!("\nReady to distribute? [y/N] ");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    } else {
        println!("\nProceeding with distribution (--yes flag set)");
    }

    let mut run = DistributionRun::new(batches, amount, asset);
    if args.wallet_provider.is_supported() {
        let wallet = KeypairWallet::new(keypair, rpc.clone());
        execute_run(rpc.as_ref(), &wallet, &config, &mut run).await?;
    } else {
        println!(
            "⚠️  {} can only sign inside a browser; every batch will be rejected",
            args.wallet_provider
        );
        let wallet = UnsupportedWallet::new(args.wallet_provider, fee_payer);
        execute_run(rpc.as_ref(), &wallet, &config, &mut run).await?;
    }

    let winners: Vec<String> = resolution
        .accepted
        .iter()
        .filter(|r| r.source == RecipientSource::Draw)
        .map(|r| r.username.clone())
        .collect();
    let report = DistributionReport::from_run(&run, network, &resolution.rejected).with_winners(winners);
    report
        .save(&args.report)
        .with_context(|| format!("Failed to write report to {}", args.report.display()))?;

    if run.was_cancelled() {
        println!("\n🛑 Distribution cancelled");
    } else {
        println!("\n✅ Distribution complete!");
    }
    println!("Succeeded: {}", report.success_count);
    println!("Failed: {}", report.fail_count);
    if report.skipped_count > 0 {
        println!("Not sent: {}", report.skipped_count);
    }
    println!("📁 Report written to {}", args.report.display());

    if !report.winners.is_empty() {
        let winners: Vec<Candidate> = resolution
            .accepted
            .iter()
            .filter(|r| r.source == RecipientSource::Draw)
            .map(|r| Candidate {
                username: r.username.clone(),
                address: Some(r.address.to_string()),
                addresses: Vec::new(),
                floor: 0,
                content: String::new(),
                duplicate: None,
            })
            .collect();
        let token = match asset {
            TransferAsset::Native => "SOL".to_string(),
            TransferAsset::Fungible(token) => token.mint.to_string(),
        };
        println!(
            "\n{}",
            payout_announcement(&winners, &token, &report.signatures(), network)
        );
    }
    Ok(())
}

async fn execute_run<W: Wallet>(
    rpc: &SolanaRpc,
    wallet: &W,
    config: &RunConfig,
    run: &mut DistributionRun,
) -> Result<()> {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let pb = ProgressBar::new(run.batches().len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} batches")?,
    );
    let sink = |event: Event| {
        if matches!(event, Event::BatchFinished { .. }) {
            pb.inc(1);
        }
        if let Some(line) = render(&event) {
            pb.println(line);
        }
    };

    RunCoordinator::new(rpc, wallet, config, token)
        .execute(run, &sink)
        .await;
    pb.finish_and_clear();
    Ok(())
}

/// Lamports the fee payer spends on the whole plan, saturating on overflow.
fn lamports_needed(summary: &PlanSummary, amount: &Amount, asset: &TransferAsset) -> u64 {
    let costs = summary
        .estimated_fee_lamports
        .saturating_add(summary.estimated_rent_lamports);
    match asset {
        TransferAsset::Native => {
            costs.saturating_add(amount.base_units.saturating_mul(summary.recipients as u64))
        }
        TransferAsset::Fungible(_) => costs,
    }
}

fn print_plan(summary: &PlanSummary, amount: &Amount, asset: &TransferAsset) {
    println!("\n=== DISTRIBUTION PLAN ===");
    println!("Recipients: {}", summary.recipients);
    println!("Amount per recipient: {} ({})", amount.ui, asset.kind());
    println!("Batches: {}", summary.batches);
    println!("Largest batch: {} bytes", summary.largest_batch_bytes);
    if summary.oversized_batches > 0 {
        println!("⚠️  Oversized batches: {}", summary.oversized_batches);
    }
    if summary.accounts_to_create > 0 {
        println!("Token accounts to create: {}", summary.accounts_to_create);
        println!(
            "    - Rent: {} × 0.00203928 = {:.4} SOL",
            summary.accounts_to_create,
            amount_to_ui(summary.estimated_rent_lamports, 9)
        );
    }
    println!(
        "    - Fees: {} transactions = {:.6} SOL",
        summary.batches,
        amount_to_ui(summary.estimated_fee_lamports, 9)
    );
}

async fn draw(args: DrawArgs) -> Result<()> {
    let snapshot = PostSnapshot::load(&args.post)
        .with_context(|| format!("Failed to load post snapshot {}", args.post.display()))?;
    println!(
        "📰 {} ({} replies, {} addresses)",
        snapshot.title,
        snapshot.replies.len(),
        snapshot.all_addresses().len()
    );

    let count = args.count.unwrap_or_else(|| snapshot.default_draw_count());
    let seed = args.seed.clone().map(Seed::Text).unwrap_or_else(Seed::random);
    println!("🎲 Drawing {} winners with seed {}", count, seed);

    let mut request = DrawRequest::new(snapshot.candidates(), count, seed);
    request.collapse_duplicates = !args.keep_duplicates;
    request.post = Some(snapshot.post_info());
    for username in &args.exclude {
        request.excluded.insert(username.clone());
    }
    if !args.include_author {
        if let Some(author) = &snapshot.author {
            println!("🎯 Post author \"{}\" will be excluded", author);
            request.excluded.insert(author.clone());
        }
    }

    let console = |event: Event| {
        if let Some(line) = render(&event) {
            println!("{}", line);
        }
    };

    let outcome: DrawOutcome = match &args.remote {
        Some(url) => {
            request.mode = DrawMode::RemoteFirst;
            let service = HttpDrawService::new(url.clone())?;
            DrawEngine::new(service, args.network).draw(&request, &console).await?
        }
        None => DrawEngine::new(NoRemote, args.network).draw(&request, &console).await?,
    };
    if let Some(commit) = &outcome.github_commit {
        println!("📜 Draw record: {}", commit.repository);
    }

    let policy = args.unresolved.into();
    let resolved = if args.skip_lookup {
        resolve_winners(outcome, &NoProfileLookup, policy, &console).await?
    } else {
        let lookup = V2exProfileLookup::new(args.v2ex_api.clone())?;
        resolve_winners(outcome, &lookup, policy, &console).await?
    };

    println!("\n🏆 Winners:");
    for (index, winner) in resolved.winners.iter().enumerate() {
        let candidate = &winner.candidate;
        println!(
            "  {}. {} (#{}) {}",
            index + 1,
            candidate.username,
            candidate.floor,
            match (&candidate.address, winner.distributable) {
                (Some(address), true) => address.clone(),
                _ => "⚠️  no address".to_string(),
            }
        );
    }

    let winners: Vec<Candidate> = resolved.winners.iter().map(|w| w.candidate.clone()).collect();
    println!("\n{}", announcement(&winners, chrono::Local::now()));

    if let Some(output) = &args.output {
        let recipients: Vec<RawRecipient> = resolved
            .distributable()
            .enumerate()
            .filter_map(|(index, candidate)| {
                candidate.address.as_ref().map(|address| RawRecipient {
                    id: index as u64 + 1,
                    address: address.clone(),
                    username: candidate.username.clone(),
                    source: RecipientSource::Draw,
                })
            })
            .collect();
        if recipients.is_empty() {
            bail!("No winner has an address to pay out to");
        }
        write_recipients(output, &recipients)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("📁 {} winners written to {}", recipients.len(), output.display());
    }
    Ok(())
}

/// One console line per event worth showing.
fn render(event: &Event) -> Option<String> {
    let line = match event {
        Event::RecipientRejected { id, address, reason } => {
            format!("⚠️  Skipping recipient #{} ({}): {}", id, address, reason)
        }
        Event::AliasResolved { alias, address } => format!("🔗 {} resolved to {}", alias, address),
        Event::BatchesPlanned { batches, recipients } => {
            format!("📦 Planned {} batches for {} recipients", batches, recipients)
        }
        Event::OversizedBatch { sequence_index, size } => format!(
            "⚠️  Batch {} holds a single transfer over the size limit ({} bytes)",
            sequence_index + 1,
            size.map_or_else(|| "unknown".to_string(), |s| s.to_string())
        ),
        Event::BatchStarted {
            sequence_index,
            total_batches,
            first_recipient,
            last_recipient,
        } => format!(
            "📊 Batch {}/{}: recipients {} to {}",
            sequence_index + 1,
            total_batches,
            first_recipient,
            last_recipient
        ),
        Event::BatchSubmitted { sequence_index, signature } => {
            format!("📤 Batch {} sent: {}", sequence_index + 1, signature)
        }
        Event::ConfirmationTimedOut { sequence_index, .. } => format!(
            "⏳ Batch {} not confirmed in time, checking status...",
            sequence_index + 1
        ),
        Event::BatchFinished {
            sequence_index,
            status,
            error,
            ..
        } => match (status.is_success(), error) {
            (true, _) => format!("✅ Batch {} {}", sequence_index + 1, status),
            (false, Some(error)) => format!("❌ Batch {} {}: {}", sequence_index + 1, status, error),
            (false, None) => format!("❌ Batch {} {}", sequence_index + 1, status),
        },
        Event::RunCancelled { remaining_batches } => {
            format!("🛑 Cancelled, {} batches not sent", remaining_batches)
        }
        Event::DrawFallback { reason } => format!(
            "⚠️  Remote draw unavailable ({}), drawing locally with the same seed",
            reason
        ),
        Event::DrawCompleted {
            winners,
            pool_size,
            remote,
        } => format!(
            "🎲 Drew {} winners from {} eligible candidates{}",
            winners,
            pool_size,
            if *remote { " (remote)" } else { "" }
        ),
        Event::ResolutionProgress(progress) => match progress.status {
            LookupStatus::Start => return None,
            LookupStatus::Retry => format!(
                "🔁 [{}%] {}: lookup failed, retrying",
                progress.percentage(),
                progress.username
            ),
            LookupStatus::Success => format!(
                "✅ [{}%] {}: address found",
                progress.percentage(),
                progress.username
            ),
            LookupStatus::NotFound => format!(
                "❔ [{}%] {}: no address on profile",
                progress.percentage(),
                progress.username
            ),
            LookupStatus::Error => format!(
                "❌ [{}%] {}: lookup failed",
                progress.percentage(),
                progress.username
            ),
            LookupStatus::Complete => "🎉 Address lookups finished".to_string(),
        },
        Event::WinnerReplaced { removed, replacement } => {
            format!("🔁 {} has no address, replaced by {}", removed, replacement)
        }
        Event::AccountMissing { .. } | Event::Cooldown { .. } | Event::RunFinished { .. } => {
            return None
        }
    };
    Some(line)
}

fn load_keypair(path: &Path) -> Result<Keypair> {
    let keypair_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read keypair from {}", path.display()))?;

    let keypair_bytes: Vec<u8> = serde_json::from_str(&keypair_str)
        .with_context(|| format!("Failed to parse keypair JSON from {}", path.display()))?;

    Keypair::from_bytes(keypair_bytes.as_slice())
        .with_context(|| format!("Invalid keypair format in {}", path.display()))
}
