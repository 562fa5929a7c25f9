pub mod batcher {
    //!
    //! Greedy batching for READ: pull messages from the store until it
    //! runs dry or the batch goes over a count or byte cap.  The caps are
    //! checked after each message is added, so a batch can hold one
    //! message more than `max_messages` or run past `max_bytes` by up to
    //! one message.
    //!
    use crate::fmq::store::store::{FmqStore, QueueMessage, StoreError};

    pub const DEFAULT_MAX_MESSAGES: usize = 100;
    pub const DEFAULT_MAX_BYTES: usize = 1_000_000;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadLimits {
        pub max_messages: usize,
        pub max_bytes: usize,
    }

    impl Default for ReadLimits {
        fn default() -> ReadLimits {
            ReadLimits {
                max_messages: DEFAULT_MAX_MESSAGES,
                max_bytes: DEFAULT_MAX_BYTES,
            }
        }
    }

    ///
    /// Drain one READ batch from `store`.  A store error throws away
    /// whatever had been gathered so far.
    ///
    pub fn drain(
        store: &mut dyn FmqStore,
        requested_type: i32,
        limits: &ReadLimits,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let mut messages = Vec::new();
        let mut total_bytes = 0usize;
        while let Some(msg) = store.read_msg(requested_type)? {
            total_bytes += msg.len();
            messages.push(msg);
            if messages.len() > limits.max_messages || total_bytes > limits.max_bytes {
                break;
            }
        }
        Ok(messages)
    }

    #[cfg(test)]
    mod batcher_test {
        use super::*;
        use crate::fmq::store::store::{CompressionMethod, InitParams, SeekPosition};
        use std::collections::VecDeque;

        // Hands out canned messages, optionally failing on the n'th read.
        struct CannedStore {
            pending: VecDeque<QueueMessage>,
            fail_at: Option<usize>,
            reads: usize,
        }

        impl CannedStore {
            fn with_sizes(sizes: &[usize]) -> CannedStore {
                CannedStore {
                    pending: sizes
                        .iter()
                        .enumerate()
                        .map(|(i, s)| QueueMessage {
                            id: i as i32,
                            msg_type: 1,
                            subtype: 0,
                            time: 0,
                            compressed: false,
                            uncompressed_len: *s as i32,
                            data: vec![0u8; *s],
                        })
                        .collect(),
                    fail_at: None,
                    reads: 0,
                }
            }
        }

        impl FmqStore for CannedStore {
            fn init(&mut self, _params: &InitParams) -> Result<(), StoreError> {
                Ok(())
            }
            fn set_server_mode(&mut self) {}
            fn set_compression_method(&mut self, _method: CompressionMethod) {}
            fn set_blocking_write(&mut self) {}
            fn set_single_writer(&mut self) {}
            fn set_register_with_dmap(&mut self, _enabled: bool, _interval_secs: i32) {}
            fn seek(&mut self, _position: SeekPosition) -> Result<(), StoreError> {
                Ok(())
            }
            fn seek_to_id(&mut self, _id: i32) -> Result<(), StoreError> {
                Ok(())
            }
            fn read_msg(&mut self, _requested_type: i32) -> Result<Option<QueueMessage>, StoreError> {
                self.reads += 1;
                if Some(self.reads) == self.fail_at {
                    return Err(StoreError::Other(String::from("disk on fire")));
                }
                Ok(self.pending.pop_front())
            }
            fn write_msg(&mut self, _t: i32, _s: i32, _data: &[u8]) -> Result<(), StoreError> {
                Ok(())
            }
            fn write_msg_pre_compressed(
                &mut self,
                _t: i32,
                _s: i32,
                _data: &[u8],
                _len: i32,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            fn close(&mut self) -> Result<(), StoreError> {
                Ok(())
            }
            fn err_str(&self) -> String {
                String::new()
            }
        }

        // The length the batch must have: the smallest k with k > M or
        // sum(s_1..s_k) > B, else everything.
        fn expected_len(sizes: &[usize], m: usize, b: usize) -> usize {
            let mut total = 0;
            for (i, s) in sizes.iter().enumerate() {
                total += s;
                let k = i + 1;
                if k > m || total > b {
                    return k;
                }
            }
            sizes.len()
        }

        #[test]
        fn empty_store_is_empty_batch() {
            let mut store = CannedStore::with_sizes(&[]);
            let batch = drain(&mut store, -1, &ReadLimits::default()).unwrap();
            assert!(batch.is_empty());
        }
        #[test]
        fn count_cap_allows_one_extra() {
            let mut store = CannedStore::with_sizes(&[1; 10]);
            let limits = ReadLimits {
                max_messages: 3,
                max_bytes: 1000,
            };
            let batch = drain(&mut store, -1, &limits).unwrap();
            assert_eq!(4, batch.len());
            // The rest are still there for the next READ.
            assert_eq!(6, store.pending.len());
        }
        #[test]
        fn byte_cap_overshoots_by_one_message() {
            let mut store = CannedStore::with_sizes(&[40, 40, 40, 40]);
            let limits = ReadLimits {
                max_messages: 100,
                max_bytes: 100,
            };
            let batch = drain(&mut store, -1, &limits).unwrap();
            assert_eq!(3, batch.len());
        }
        #[test]
        fn exact_byte_cap_does_not_stop() {
            let mut store = CannedStore::with_sizes(&[50, 50, 10]);
            let limits = ReadLimits {
                max_messages: 100,
                max_bytes: 100,
            };
            assert_eq!(3, drain(&mut store, -1, &limits).unwrap().len());
        }
        #[test]
        fn error_discards_partial_batch() {
            let mut store = CannedStore::with_sizes(&[1, 2, 3]);
            store.fail_at = Some(3);
            let result = drain(&mut store, -1, &ReadLimits::default());
            assert_eq!(Err(StoreError::Other(String::from("disk on fire"))), result);
        }
        #[test]
        fn stop_rule_over_many_shapes() {
            let shapes: Vec<Vec<usize>> = vec![
                vec![],
                vec![5],
                vec![0, 0, 0, 0, 0, 0],
                vec![10, 20, 30, 40, 50],
                vec![100, 1, 1, 1],
                vec![1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1],
                vec![7, 300, 2],
            ];
            for sizes in &shapes {
                for m in 0..6 {
                    for b in &[0usize, 1, 10, 60, 150, 1000] {
                        let mut store = CannedStore::with_sizes(sizes);
                        let limits = ReadLimits {
                            max_messages: m,
                            max_bytes: *b,
                        };
                        let batch = drain(&mut store, -1, &limits).unwrap();
                        assert_eq!(
                            expected_len(sizes, m, *b),
                            batch.len(),
                            "sizes {:?} M {} B {}",
                            sizes,
                            m,
                            b
                        );
                        for (i, msg) in batch.iter().enumerate() {
                            assert_eq!(i as i32, msg.id);
                        }
                    }
                }
            }
        }
    }
}
