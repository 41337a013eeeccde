use crate::comm::wire::Channel;
use crate::error::Error;
use crate::muted_error;
use std::marker::PhantomData;

/// Lazy sequence of records terminated by an empty message.
///
/// The stream borrows the session connection, so no other command can be sent until it is
/// dropped. Dropping it before the end reads and discards the remaining records.
pub struct RecordStream<'a, T> {
    chan: &'a mut Channel,
    parse: fn(u32, &str) -> Result<T, Error>,
    index: u32,
    done: bool,
    _record: PhantomData<T>,
}

impl<'a, T> RecordStream<'a, T> {
    /// `parse` receives the record number (from 0) and its text.
    pub fn new(chan: &'a mut Channel, parse: fn(u32, &str) -> Result<T, Error>) -> Self {
        Self {
            chan,
            parse,
            index: 0,
            done: false,
            _record: PhantomData,
        }
    }

    fn next_raw(&mut self) -> Result<Option<String>, Error> {
        let msg = self.chan.recv_string()?;
        Ok((!msg.is_empty()).then_some(msg))
    }
}

impl<T> Iterator for RecordStream<'_, T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_raw() {
            Ok(Some(raw)) => {
                let index = self.index;
                self.index += 1;
                let record = self.chan.decoded((self.parse)(index, &raw));
                // nothing after an undecodable record can be trusted
                self.done = record.is_err();
                Some(record)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T> Drop for RecordStream<'_, T> {
    fn drop(&mut self) {
        if self.done || self.chan.is_broken() {
            return;
        }
        loop {
            match muted_error!(self.next_raw(), "drain record stream:") {
                Some(Some(_)) => continue,
                _ => break,
            }
        }
    }
}
