mod command;
mod prompt;
mod util;

fn main() -> anyhow::Result<()> {
    command::run()
}
