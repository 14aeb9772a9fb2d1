pub fn main() -> std::process::ExitCode {
    lunapr::run()
}
