#[allow(clippy::many_single_char_names)]
pub fn parse_triplet<T: std::str::FromStr>(s: &str) -> Result<(T,T,T), String>
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let v = s.split(',').map(str::trim).collect::<Vec<_>>();
    if v.len() != 3 {
        return Err(format!("expected three comma-separated values, got `{s}`"));
    }
    let parse = |x: &str| x.parse::<T>().map_err(|e| format!("`{x}`: {e}"));
    let x = parse(v[0])?;
    let y = parse(v[1])?;
    let z = parse(v[2])?;
    Ok((x, y, z))
}

/// Group numeric digits to facilitate reading long numbers
pub fn group_digits<F: std::fmt::Display>(n: F) -> String {
    use numsep::{separate, Locale};
    separate(n, Locale::English)
}


pub mod timing {

    use super::group_digits;
    use std::time::Instant;
    use tracing::info;

    /// Log the time taken by successive stages of a computation
    pub struct Progress {
        previous: Instant,
        message: String,
    }

    impl Progress {

        #[allow(clippy::new_without_default)]
        pub fn new() -> Self { Self { previous: Instant::now(), message: String::new() } }

        /// Log message, start timer
        pub fn start(&mut self, message: &str) {
            info!("{message} ...");
            self.message = message.to_string();
            self.start_timer();
        }

        // Log time elapsed since last start or done
        pub fn done(&mut self) {
            info!("{}: {} ms", self.message, group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        // Log message followed by time elapsed since last start or done
        pub fn done_with_message(&mut self, message: &str) {
            info!("{message}: {} ms", group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        fn start_timer(&mut self) { self.previous = Instant::now() }
    }
}
