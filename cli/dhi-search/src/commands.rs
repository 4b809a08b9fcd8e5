use std::fmt::Write;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use bpaf::Bpaf;
use dhi_catalog::{CatalogConfig, DhiCatalog, SelfTestReport};
use indoc::indoc;
use serde::Serialize;
use tracing::{debug, instrument};

const DESCRIPTION: &str = indoc! {"
    Search the Docker Hardened Images catalog.

    Credentials are read from DOCKER_USERNAME and DOCKER_PAT.
    Query results are printed to stdout as JSON."};

pub(crate) const DEFAULT_SEARCH_LIMIT: usize = 10;

fn vec_len<T>(x: Vec<T>) -> usize {
    Vec::len(&x)
}

#[derive(Bpaf, Clone, Copy, Debug, PartialEq)]
pub enum Verbosity {
    Verbose(
        /// Increase logging verbosity
        ///
        /// Invoke multiple times for increasing detail.
        #[bpaf(short('v'), long("verbose"), req_flag(()), many, map(vec_len))]
        usize,
    ),

    /// Silence logs except for errors
    #[bpaf(short, long)]
    Quiet,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Verbose(0)
    }
}

#[derive(Debug, Bpaf)]
#[bpaf(options, version, descr(DESCRIPTION))]
pub struct DhiSearchCli {
    #[bpaf(external, fallback(Default::default()))]
    pub verbosity: Verbosity,

    /// Test connectivity to the DHI catalog and exit
    #[bpaf(long)]
    pub test: bool,

    #[bpaf(external(command), optional)]
    pub command: Option<Command>,
}

impl DhiSearchCli {
    pub async fn handle(self, config: CatalogConfig) -> Result<ExitCode> {
        let catalog =
            DhiCatalog::from_config(&config).context("failed to set up catalog client")?;

        if self.test {
            println!("Testing DHI catalog connectivity...");
            let report = catalog.self_test().await;
            print!("{}", render_self_test(&report));
            return Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }

        let Some(command) = self.command else {
            bail!("no command given, run with '--test' or a subcommand (see '--help')");
        };
        command.handle(&catalog).await?;
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Bpaf, Clone, Debug)]
pub enum Command {
    /// Fuzzy search the catalog for a repository name
    #[bpaf(command)]
    Search(#[bpaf(external(search))] Search),

    /// Find the best matching repositories for several image names
    #[bpaf(command)]
    Batch(#[bpaf(external(batch))] Batch),

    /// Show the number of catalog entries per type
    #[bpaf(command)]
    Stats(#[bpaf(external(stats))] Stats),

    /// List repository names
    #[bpaf(command)]
    Images(#[bpaf(external(images))] Images),

    /// List the tags of a repository
    #[bpaf(command)]
    Tags(#[bpaf(external(tags))] Tags),

    /// Show which tags of a repository are FIPS or STIG compliant
    #[bpaf(command)]
    Compliance(#[bpaf(external(compliance))] Compliance),

    /// Show end of life and end of support dates of a tag
    #[bpaf(command)]
    Support(#[bpaf(external(support))] Support),
}

impl Command {
    #[instrument(skip_all)]
    async fn handle(self, catalog: &DhiCatalog) -> Result<()> {
        match self {
            Command::Search(args) => {
                debug!(query = %args.query, limit = args.limit, "searching catalog");
                print_json(&catalog.search(&args.query, args.limit).await?)
            },
            Command::Batch(args) => {
                print_json(&catalog.search_many(args.queries.as_slice()).await?)
            },
            Command::Stats(Stats {}) => print_json(&catalog.statistics().await?),
            Command::Images(args) => {
                print_json(&catalog.list_images(args.kind.as_deref()).await?)
            },
            Command::Tags(args) => print_json(&catalog.list_tags(&args.repository).await?),
            Command::Compliance(args) => {
                print_json(&catalog.compliance_info(&args.repository).await?)
            },
            Command::Support(args) => {
                print_json(&catalog.support_info(&args.repository, &args.tag).await?)
            },
        }
    }
}

#[derive(Bpaf, Clone, Debug)]
pub struct Search {
    /// Maximum number of results
    #[bpaf(short, long, argument("N"), fallback(DEFAULT_SEARCH_LIMIT))]
    pub limit: usize,

    /// Name to search for, e.g. 'postgres' or '.NET runtime'
    #[bpaf(positional("QUERY"))]
    pub query: String,
}

#[derive(Bpaf, Clone, Debug)]
pub struct Batch {
    /// Image names to resolve
    #[bpaf(positional("QUERY"), some("at least one image name is required"))]
    pub queries: Vec<String>,
}

#[derive(Bpaf, Clone, Debug)]
pub struct Stats {}

#[derive(Bpaf, Clone, Debug)]
pub struct Images {
    /// Only list repositories of this type, e.g. IMAGE or HELM_CHART
    #[bpaf(short('t'), long("type"), argument("TYPE"))]
    pub kind: Option<String>,
}

#[derive(Bpaf, Clone, Debug)]
pub struct Tags {
    #[bpaf(positional("REPOSITORY"))]
    pub repository: String,
}

#[derive(Bpaf, Clone, Debug)]
pub struct Compliance {
    #[bpaf(positional("REPOSITORY"))]
    pub repository: String,
}

#[derive(Bpaf, Clone, Debug)]
pub struct Support {
    #[bpaf(positional("REPOSITORY"))]
    pub repository: String,

    #[bpaf(positional("TAG"))]
    pub tag: String,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{json}");
    Ok(())
}

/// Human readable summary of a connectivity check.
pub(crate) fn render_self_test(report: &SelfTestReport) -> String {
    let mut out = String::new();

    if !report.success {
        let error = report.error.as_deref().unwrap_or("unknown error");
        let _ = writeln!(out, "Error: {error}");
        return out;
    }

    let _ = writeln!(out, "Successfully connected to DHI catalog!");
    let _ = writeln!(out, "Catalog contains {} items.", report.total_items);
    for (kind, count) in &report.by_type {
        let _ = writeln!(out, "  - {kind}: {count}");
    }

    if let Some(sample) = &report.sample {
        let _ = writeln!(out);
        let _ = writeln!(out, "Tested tag retrieval for: {}", sample.repository);
        let _ = writeln!(out, "Found {} tags.", sample.tag_count);
        let _ = writeln!(out, "Compliance: FIPS={}, STIG={}", sample.fips, sample.stig);
        if let Some(support) = &sample.support {
            let _ = writeln!(
                out,
                "Support info for {}:{}: end of life {}, end of support {}",
                support.repository, support.tag, support.end_of_life, support.end_of_support
            );
        }
    }

    out
}
