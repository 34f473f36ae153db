/// Reassembles complete lines from arbitrary chunks of backend output.
#[derive(Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    skip_lf: bool,
}

impl LineBuffer {
    /// Feed a chunk, return lines completed by it (without terminators).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = vec![];
        for &b in bytes {
            if self.skip_lf {
                self.skip_lf = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' => lines.push(self.take()),
                b'\r' => {
                    lines.push(self.take());
                    self.skip_lf = true;
                }
                _ => self.partial.push(b),
            }
        }
        lines
    }

    /// Flush a trailing line that has no terminator.
    pub fn finish(&mut self) -> Option<String> {
        self.skip_lf = false;
        if self.partial.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}
