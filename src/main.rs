fn main() -> std::process::ExitCode {
    ttytap_lib::run()
}
