use clap::Parser;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Load HTTP resources through the siesta cache",
    long_about = "Fetches one or more URLs through a siesta service and prints their decoded content.\n\
                  \n\
                  JSON responses are pretty-printed, text is printed verbatim and binary bodies\n\
                  are summarized. Repeated loads revalidate with the server using ETags."
)]
pub struct CliArgs {
    /// URLs to load
    #[arg(required = true, help = "Absolute URL(s) to load")]
    pub urls: Vec<String>,

    /// Custom HTTP headers for every request
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// User agent string
    #[arg(long, help = "User agent sent with every request")]
    pub user_agent: Option<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(long, help = "Proxy server URL (e.g., \"http://proxy.example.com:8080\")")]
    pub proxy: Option<String>,

    /// Skip response decoding
    #[arg(long, help = "Print raw bodies instead of decoding text and JSON")]
    pub raw: bool,

    /// Number of times each URL is loaded
    #[arg(
        long,
        default_value = "1",
        help = "Load each URL this many times; later loads revalidate the cached copy"
    )]
    pub repeat: u32,

    /// Show progress bars for requests
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show a progress bar for every request"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
