use std::borrow::Cow;
use std::iter::ExactSizeIterator;
use std::io::{self, Stderr};
use std::time::Duration;

use pbr::ProgressBar;

/// Wraps an iterator with a progress bar on stderr, so experiment output on
/// stdout stays clean.
pub struct ReportingIterator<I>
  where I: ExactSizeIterator,
{
  name: Cow<'static, str>,
  progress: ProgressBar<Stderr>,
  inner: I,
  done: bool,
}
impl<I> ReportingIterator<I>
  where I: ExactSizeIterator,
{
  pub fn new<N>(inner: I, name: N) -> ReportingIterator<I>
    where N: Into<Cow<'static, str>>,
  {
    let name = name.into();
    let mut p = ProgressBar::on(io::stderr(), inner.len() as u64);
    p.show_speed = true;
    p.show_percent = true;
    p.show_counter = true;
    p.show_time_left = true;

    let fps = Duration::new(1, 0) / 60;
    p.set_max_refresh_rate(Some(fps));

    let msg = format!("{}: ", name);
    p.message(&msg[..]);
    ReportingIterator {
      name,
      progress: p,
      inner,
      done: false,
    }
  }
}

impl<I> Iterator for ReportingIterator<I>
  where I: ExactSizeIterator,
{
  type Item = I::Item;
  fn next(&mut self) -> Option<Self::Item> {
    match self.inner.next() {
      Some(v) => {
        self.progress.inc();
        Some(v)
      },
      None => {
        if !self.done {
          self.done = true;
          let msg = format!("{} done!\n", self.name);
          self.progress.finish_println(&msg);
        }

        None
      },
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) { self.inner.size_hint() }
}
impl<I> ExactSizeIterator for ReportingIterator<I>
  where I: ExactSizeIterator,
{ }
