fn main() {
    if let Err(err) = forward_render::run() {
        eprintln!("Application error: {err}");
    }
}
