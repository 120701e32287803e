use clap::{Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "zipserve")]
#[command(version)]
#[command(about = "Serve ZIP archive contents over HTTP as browsable directories", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipserve serve --root /srv/www --cache /var/cache/zipserve   serve /srv/www, browsing docs.zip as /docs/\n  \
  zipserve cat site.zip css/main.css | less                     stream one entry to stdout\n  \
  zipserve index -v site.zip                                    (re)build and show the cached entry table")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a directory tree over HTTP
    Serve(ServeArgs),

    /// Write one archive entry to stdout
    Cat {
        /// ZIP archive path
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Entry name inside the archive
        #[arg(value_name = "ENTRY")]
        entry: String,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Index an archive (if stale) and list its cached entries
    Index {
        /// ZIP archive path
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// List verbosely with sizes and compression ratio
        #[arg(short = 'v')]
        verbose: bool,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Drop an archive's cached entry table
    Forget {
        /// ZIP archive path
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        #[command(flatten)]
        cache: CacheArgs,
    },
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Directory holding the metadata cache
    #[arg(short = 'c', long = "cache", value_name = "DIR", default_value = ".")]
    pub cache_dir: String,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Directory tree to serve
    #[arg(short = 'r', long = "root", value_name = "DIR", default_value = ".")]
    pub root_dir: String,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Listen address (host:port)
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Render listings for directories
    #[arg(long)]
    pub create_indexes: bool,

    /// Serve and list dot-files
    #[arg(long)]
    pub expose_hidden_files: bool,

    /// Entry served for requests to an archive's root
    #[arg(long, value_name = "NAME", default_value = "index.html")]
    pub index_file: String,
}

impl ServeArgs {
    pub fn to_config(&self) -> Config {
        Config::builder()
            .root_dir(&self.root_dir)
            .cache_dir(&self.cache.cache_dir)
            .listen_addr(&self.listen)
            .create_indexes(self.create_indexes)
            .expose_hidden_files(self.expose_hidden_files)
            .index_file(&self.index_file)
            .build()
    }
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
