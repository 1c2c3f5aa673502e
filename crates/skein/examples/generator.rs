use {
    skein::{Backend, FiberBuilder, FiberHandle},
    std::cell::Cell,
    tracing::{info, info_span},
};

/// Produces Fibonacci numbers one per activation, handing each out through the user-data slot.
#[tracing::instrument(skip(f))]
fn fibonacci(f: &FiberHandle<'_>, count: usize) {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..count {
        // SAFETY: `main` points the slot at a live `Option<u64>` before every resume.
        unsafe { *f.userdata().cast::<Option<u64>>() = Some(a) };
        f.yield_now();
        (a, b) = (b, a + b);
    }
}

fn main() -> Result<(), skein::Error> {
    tracing_subscriber::fmt::init();

    for &backend in Backend::available() {
        let _span = info_span!("backend", %backend).entered();

        let mut slot: Option<u64> = None;
        let generator = FiberBuilder::new()
            .name("fibonacci")
            .backend(backend)
            .stack_size(64 * 1024)
            .spawn(|f| fibonacci(f, 10))?;
        generator.set_userdata((&mut slot as *mut Option<u64>).cast());

        let mut values = Vec::new();
        while generator.resume() && !generator.is_finished() {
            // SAFETY: The generator is suspended, so nothing else is touching `slot`.
            if let Some(value) = unsafe { (*generator.userdata().cast::<Option<u64>>()).take() } {
                values.push(value);
            }
        }
        info!(?values, "Generator exhausted.");

        // Two fibers taking turns, driven from the thread's own stack.
        let rally = Cell::new(0);
        let player = |name: &'static str| {
            let rally = &rally;
            move |f: &FiberHandle<'_>| {
                while rally.get() < 6 {
                    rally.set(rally.get() + 1);
                    info!(player = name, hit = rally.get(), "Returned the ball.");
                    f.yield_now();
                }
            }
        };
        let ping = FiberBuilder::new().name("ping").backend(backend).spawn(player("ping"))?;
        let pong = FiberBuilder::new().name("pong").backend(backend).spawn(player("pong"))?;
        while !(ping.is_finished() && pong.is_finished()) {
            for fiber in [&ping, &pong] {
                if !fiber.is_finished() {
                    fiber.resume();
                }
            }
        }
        info!(hits = rally.get(), "Rally over.");
    }
    Ok(())
}
