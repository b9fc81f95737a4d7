fn main() -> anyhow::Result<()> {
    focusflow_lib::run()
}
