//! Deterministic names for peer counties, gentry heads and officials.
//!
//! All generation is deterministic (same RNG seed = same names).

use crate::rng::SubsystemRng;

/// Deterministic name generator using curated name lists
pub struct NameGenerator;

impl NameGenerator {
    /// Surname + given name, e.g. "Zhou Wenbin"
    pub fn full_name(rng: &mut SubsystemRng) -> String {
        let surname = Self::surname(rng);
        let given = Self::given_name(rng);
        format!("{surname} {given}")
    }

    /// A gentry head, addressed by surname and courtesy title.
    pub fn gentry_name(rng: &mut SubsystemRng) -> String {
        let surname = Self::surname(rng);
        let title = Self::pick(rng, Self::gentry_titles());
        format!("{title} {surname}")
    }

    /// Peer county name, e.g. "Qinghe County"
    pub fn county_name(rng: &mut SubsystemRng) -> String {
        let prefix = Self::pick(rng, Self::county_prefixes());
        let suffix = Self::pick(rng, Self::county_suffixes());
        format!("{prefix}{suffix} County")
    }

    pub fn surname(rng: &mut SubsystemRng) -> &'static str {
        Self::pick(rng, Self::surnames())
    }

    pub fn given_name(rng: &mut SubsystemRng) -> &'static str {
        Self::pick(rng, Self::given_names())
    }

    fn pick(rng: &mut SubsystemRng, names: &'static [&'static str]) -> &'static str {
        let index = rng.next_u64_below(names.len() as u64) as usize;
        names[index]
    }

    fn surnames() -> &'static [&'static str] {
        &[
            "Wang", "Li", "Zhang", "Liu", "Chen", "Yang", "Zhao", "Huang", "Zhou", "Wu",
            "Xu", "Sun", "Hu", "Zhu", "Gao", "Lin", "He", "Guo", "Ma", "Luo",
            "Liang", "Song", "Zheng", "Xie", "Han", "Tang", "Feng", "Yu", "Dong", "Xiao",
            "Cheng", "Cao", "Yuan", "Deng", "Fu", "Shen", "Zeng", "Peng", "Lu", "Su",
            "Jiang", "Cai", "Jia", "Ding", "Wei", "Xue", "Ye", "Yan", "Pan", "Du",
        ]
    }

    fn given_names() -> &'static [&'static str] {
        &[
            "Wenbin", "Zhiyuan", "Shoumin", "Jingde", "Hongxu", "Yanzhi", "Bingwen", "Guangzu",
            "Tingxiu", "Mingxuan", "Chengzhi", "Deming", "Shiyong", "Zongxian", "Weiqing", "Jiashu",
            "Yongtai", "Shaohua", "Kejian", "Rulin", "Boyuan", "Xianzhang", "Qiheng", "Songnian",
            "Yuanlong", "Zhaoxi", "Huaide", "Lianfang", "Jinglun", "Tianyou", "Shunli", "Baoshan",
            "Guozhen", "Enpei", "Xiaoyi", "Wenyao", "Ruiqing", "Dingguo", "Fengchun", "Zhenbang",
        ]
    }

    fn gentry_titles() -> &'static [&'static str] {
        &["Squire", "Master", "Elder", "Patriarch", "Licentiate", "Old Master"]
    }

    fn county_prefixes() -> &'static [&'static str] {
        &[
            "Qing", "An", "Ping", "Yong", "Chang", "Ning", "Fu", "Xin", "Bai", "Jin",
            "Song", "Lin", "Huai", "Tai", "Shou", "Le", "Kang", "Jing", "Bao", "Feng",
        ]
    }

    fn county_suffixes() -> &'static [&'static str] {
        &[
            "he", "yang", "shan", "ling", "chuan", "ping", "an", "xi", "tang", "yuan",
            "zhou", "cheng", "shui", "qiao", "gu",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_repeat_for_same_seed() {
        let mut a = SubsystemRng::new(11, 7);
        let mut b = SubsystemRng::new(11, 7);
        for _ in 0..20 {
            assert_eq!(NameGenerator::full_name(&mut a), NameGenerator::full_name(&mut b));
            assert_eq!(NameGenerator::county_name(&mut a), NameGenerator::county_name(&mut b));
        }
    }

    #[test]
    fn county_names_end_with_county() {
        let mut rng = SubsystemRng::new(3, 7);
        assert!(NameGenerator::county_name(&mut rng).ends_with(" County"));
    }
}
