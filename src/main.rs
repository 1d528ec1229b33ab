fn main() {
    if let Err(err) = gfx_device::run() {
        eprintln!("Application error: {err}");
    }
}
