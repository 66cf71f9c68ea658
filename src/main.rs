fn main() -> anyhow::Result<()> {
    blink_or_die_lib::run()
}
