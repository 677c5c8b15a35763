use clap::{Parser, Subcommand};
use std::net::SocketAddr;

/// Orion - application operator for Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the controller against the current cluster
    Run {
        /// Address for the /healthz and /readyz probes
        #[arg(long, env = "ORION_HEALTH_ADDR")]
        health_addr: Option<SocketAddr>,
    },

    /// Print the Application CustomResourceDefinition as YAML
    Crd,

    /// Reconcile one application in memory, without a cluster
    Simulate {
        /// Application name
        #[arg(long, default_value = "simple-nginx")]
        name: String,

        /// Container image
        #[arg(long, default_value = "nginx:latest")]
        image: String,

        /// Desired replicas
        #[arg(long, default_value = "3")]
        replicas: i32,

        /// Request a local PostgreSQL database
        #[arg(long)]
        database: bool,

        /// Request a local Redis cache
        #[arg(long)]
        cache: bool,

        /// Request a local S3-compatible object store
        #[arg(long)]
        object_store: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_simulate_defaults() {
        let args = Args::parse_from(["orion-operator", "simulate", "--database"]);
        match args.mode {
            Mode::Simulate {
                name,
                replicas,
                database,
                cache,
                ..
            } => {
                assert_eq!(name, "simple-nginx");
                assert_eq!(replicas, 3);
                assert!(database);
                assert!(!cache);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_run_health_addr() {
        let args = Args::parse_from(["orion-operator", "run", "--health-addr", "127.0.0.1:9090"]);
        match args.mode {
            Mode::Run { health_addr } => {
                assert_eq!(health_addr, Some("127.0.0.1:9090".parse::<SocketAddr>().unwrap()));
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }
}
