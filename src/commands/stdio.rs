use pastelink_lib::signaling::TransferMedium;
use pastelink_lib::Error;
use std::io::{self, BufRead, Write};

/// Terminal as transfer medium: the payload is printed for the user to
/// copy, the peer's is pasted back on stdin and ends at the first empty
/// line after some content.
pub struct StdioMedium<R = io::BufReader<io::Stdin>, W = io::Stdout> {
    input: R,
    output: W,
    pasted: Option<String>,
}

impl StdioMedium {
    pub fn new() -> Self {
        Self::with_io(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdioMedium<R, W> {
    pub fn with_io(input: R, output: W) -> Self {
        Self {
            input,
            output,
            pasted: None,
        }
    }

    fn read_block(&mut self) -> io::Result<Option<String>> {
        let mut block = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                break;
            }
            if line.trim().is_empty() {
                if block.is_empty() {
                    continue;
                }
                break;
            }
            block.push_str(&line);
        }
        Ok((!block.is_empty()).then_some(block))
    }
}

impl<R: BufRead + Send, W: Write + Send> TransferMedium for StdioMedium<R, W> {
    fn publish(&mut self, payload: &str) -> pastelink_lib::Result<()> {
        writeln!(self.output, "\n----- copy everything below to the peer -----")?;
        writeln!(self.output, "{}", payload.trim_end())?;
        writeln!(self.output, "----- end -----\n")?;
        self.output.flush()?;
        Ok(())
    }

    /// Reads once; later calls return the same paste. Blank lines before
    /// the paste are skipped, so running out of input is an error.
    fn fetch(&mut self) -> pastelink_lib::Result<Option<String>> {
        if self.pasted.is_none() {
            match self.read_block()? {
                Some(block) => self.pasted = Some(block),
                None => {
                    return Err(Error::UnrecognizedPayload(
                        "input closed before anything was pasted".into(),
                    ))
                }
            }
        }
        Ok(self.pasted.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paste_ends_at_blank_line() {
        let input = "\n\nANSWER:\nv=0\r\ns=-\n\nignored\n".as_bytes();
        let mut medium = StdioMedium::with_io(input, Vec::new());
        let first = medium.fetch().unwrap().unwrap();
        assert_eq!(first, "ANSWER:\nv=0\r\ns=-\n");
        assert_eq!(medium.fetch().unwrap().unwrap(), first);
    }

    #[test]
    fn closed_input_is_an_error() {
        let mut medium = StdioMedium::with_io("\n \n".as_bytes(), Vec::new());
        assert!(matches!(
            medium.fetch(),
            Err(Error::UnrecognizedPayload(_))
        ));
    }

    #[test]
    fn publish_frames_the_payload() {
        let mut out = Vec::new();
        StdioMedium::with_io(&b""[..], &mut out)
            .publish("OFFER:\nv=0\n")
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("copy everything below"));
        assert!(printed.contains("OFFER:\nv=0\n----- end -----"));
    }
}
