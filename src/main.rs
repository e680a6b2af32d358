use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    let sliced: Vec<&str> = args.iter().skip(1).map(|s| &s[..]).collect();

    std::process::exit(strata::compile::launch(&sliced));
}
