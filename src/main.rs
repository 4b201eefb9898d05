fn main() -> anyhow::Result<()> {
    screen_alert_lib::run()
}
