fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if handle_cli_flags(&args) {
        return;
    }

    if let Err(err) = v2ex_pager::run(&args) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: &[String]) -> bool {
    let mut saw_flag = false;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("v2ex-pager {}", v2ex_pager::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "v2ex-pager - Page through V2EX listings from the terminal.\n\n  notifications [--page N] [--pages N]           List your notifications\n  topics <node> [--page N] [--pages N]           List topics of a node\n  replies <topic> [--page N] [--pages N]         List replies of a topic\n  member-topics <user> [--page N] [--pages N]    List topics started by a member\n  search <keyword> [--page N] [--pages N]        Search topics through sov2ex\n  sanitize [FILE|-] [--image SRC=WxH]...         Fix image sizes and protected emails in HTML\n  decode-email <hex>                             Decode a protected email address\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
